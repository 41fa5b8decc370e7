//! Logical clock used to order snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_GLOBAL: AtomicU64 = AtomicU64::new(1);
static LAST_UTC_NANOS: AtomicI64 = AtomicI64::new(0);

/// A comparable logical timestamp.
///
/// Stamps are ordered by `(wall clock, global counter, local increment)`. The
/// wall clock is clamped so it never runs backwards inside one process, which
/// makes `VersionStamp::create() < VersionStamp::create()` hold for stamps
/// created in sequence. Two stamps created independently say nothing about
/// real time beyond that.
///
/// [`VersionStamp::default`] is the zero stamp and is older than every stamp
/// returned by [`VersionStamp::create`].
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VersionStamp {
    utc_nanos: i64,
    global: u64,
    local: u32,
}

impl VersionStamp {
    /// A fresh stamp, newer than every stamp created before it in this process.
    pub fn create() -> Self {
        Self::create_at(monotonic_utc_nanos())
    }

    fn create_at(utc_nanos: i64) -> Self {
        Self {
            utc_nanos,
            global: NEXT_GLOBAL.fetch_add(1, Ordering::Relaxed),
            local: 0,
        }
    }

    /// A stamp derived from `self` that is strictly newer than it and than
    /// every stamp created so far in this process.
    ///
    /// When the clock has not moved on, the result keeps the time of `self`
    /// and takes a fresh global counter. The local increment only breaks ties
    /// with stamps whose counter is ahead of this process.
    pub fn newer(self) -> Self {
        let now = monotonic_utc_nanos();
        if now > self.utc_nanos {
            return Self::create_at(now);
        }
        let global = NEXT_GLOBAL.fetch_add(1, Ordering::Relaxed);
        if global > self.global {
            Self {
                global,
                local: 0,
                ..self
            }
        } else {
            Self {
                local: self.local.saturating_add(1),
                ..self
            }
        }
    }

    /// The greater of `self` and `other`.
    #[inline]
    pub fn newer_of(self, other: VersionStamp) -> Self {
        self.max(other)
    }

    #[inline]
    pub fn is_newer_than(self, other: VersionStamp) -> bool {
        self > other
    }

    #[inline]
    pub fn is_newer_or_equal(self, other: VersionStamp) -> bool {
        self >= other
    }

    #[inline]
    pub fn is_default(self) -> bool {
        self == Self::default()
    }
}

impl fmt::Debug for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionStamp({}:{}:{})", self.utc_nanos, self.global, self.local)
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.utc_nanos, self.global, self.local)
    }
}

fn monotonic_utc_nanos() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0);
    let previous = LAST_UTC_NANOS.fetch_max(now, Ordering::Relaxed);
    previous.max(now)
}
