use std::collections::BTreeMap;
use std::fmt;

use nova_core::VersionStamp;
use parking_lot::Mutex;

pub const DEFAULT_MAX_VERSIONS: usize = 2;

/// A small cache keyed by [`VersionStamp`] that keeps the newest entries.
///
/// Inserting into a full cache evicts the oldest entry, but only when it is
/// strictly older than the incoming version. A value older than everything
/// cached is therefore never stored, and an entry newer than the incoming
/// one is never dropped for it.
pub struct VersionCache<T> {
    max_versions: usize,
    entries: Mutex<BTreeMap<VersionStamp, T>>,
}

impl<T: Clone> VersionCache<T> {
    pub fn new(max_versions: usize) -> Self {
        Self {
            max_versions: max_versions.max(1),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    pub fn get(&self, version: VersionStamp) -> Option<T> {
        self.entries.lock().get(&version).cloned()
    }

    /// Caches `value` for `version`. Returns whether it was stored.
    pub fn insert(&self, version: VersionStamp, value: T) -> bool {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get_mut(&version) {
            *slot = value;
            return true;
        }
        while entries.len() >= self.max_versions {
            match entries.first_key_value() {
                Some((oldest, _)) if *oldest < version => {
                    let oldest = *oldest;
                    entries.remove(&oldest);
                }
                _ => {
                    tracing::trace!(
                        target = "nova.cache",
                        version = %version,
                        "version too old to cache"
                    );
                    return false;
                }
            }
        }
        entries.insert(version, value);
        true
    }

    /// Returns the cached value for `version`, computing and caching it
    /// otherwise. `compute` runs without the cache lock held; if another
    /// caller cached the same version meanwhile, that value wins.
    pub fn get_or_insert_with(&self, version: VersionStamp, compute: impl FnOnce() -> T) -> T {
        match self.try_get_or_insert_with(version, || Ok::<_, std::convert::Infallible>(compute())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Fallible [`VersionCache::get_or_insert_with`]. Errors are not cached.
    pub fn try_get_or_insert_with<E>(
        &self,
        version: VersionStamp,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        if let Some(value) = self.get(version) {
            return Ok(value);
        }
        let value = compute()?;
        if let Some(existing) = self.get(version) {
            return Ok(existing);
        }
        self.insert(version, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Cached versions, oldest first.
    pub fn versions(&self) -> Vec<VersionStamp> {
        self.entries.lock().keys().copied().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<T: Clone> Default for VersionCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VERSIONS)
    }
}

impl<T> fmt::Debug for VersionCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionCache")
            .field("max_versions", &self.max_versions)
            .field("versions", &self.entries.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const PROPTEST_CASES: u32 = 256;

    fn stamps(count: usize) -> Vec<VersionStamp> {
        let mut out = vec![VersionStamp::create()];
        while out.len() < count {
            let next = out[out.len() - 1].newer();
            out.push(next);
        }
        out
    }

    #[test]
    fn keeps_the_newest_versions() {
        let v = stamps(3);
        let cache = VersionCache::default();
        assert!(cache.insert(v[0], "a"));
        assert!(cache.insert(v[1], "b"));
        assert!(cache.insert(v[2], "c"));

        assert_eq!(cache.versions(), vec![v[1], v[2]]);
        assert_eq!(cache.get(v[0]), None);
        assert_eq!(cache.get(v[2]), Some("c"));
    }

    #[test]
    fn older_versions_do_not_evict_newer_ones() {
        let v = stamps(3);
        let cache = VersionCache::default();
        cache.insert(v[1], 1);
        cache.insert(v[2], 2);

        assert!(!cache.insert(v[0], 0));
        assert_eq!(cache.versions(), vec![v[1], v[2]]);
        assert_eq!(cache.get_or_insert_with(v[0], || 10), 10);
        assert_eq!(cache.get(v[0]), None);
    }

    #[test]
    fn reinserting_replaces_without_eviction() {
        let v = stamps(2);
        let cache = VersionCache::default();
        cache.insert(v[0], "old");
        cache.insert(v[1], "b");
        assert!(cache.insert(v[0], "new"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(v[0]), Some("new"));
    }

    #[test]
    fn errors_are_not_cached() {
        let v = stamps(1);
        let cache = VersionCache::<u32>::default();
        assert_eq!(cache.try_get_or_insert_with(v[0], || Err("boom")), Err("boom"));
        assert!(cache.is_empty());
        assert_eq!(cache.try_get_or_insert_with(v[0], || Ok::<_, ()>(4)), Ok(4));
        assert_eq!(cache.get_or_insert_with(v[0], || unreachable!()), 4);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: PROPTEST_CASES, .. ProptestConfig::default() })]

        #[test]
        fn never_exceeds_capacity_and_never_drops_newer(
            capacity in 1usize..5,
            order in prop::collection::vec(0usize..12, 1..40),
        ) {
            let v = stamps(12);
            let cache = VersionCache::new(capacity);
            for index in order {
                let before = cache.versions();
                let stored = cache.insert(v[index], index);
                let after = cache.versions();

                prop_assert!(after.len() <= capacity);
                for kept in before.iter().filter(|version| **version > v[index]) {
                    prop_assert!(after.contains(kept));
                }
                prop_assert_eq!(stored, after.contains(&v[index]));
                if stored {
                    prop_assert_eq!(cache.get(v[index]), Some(index));
                }
            }
        }
    }
}
