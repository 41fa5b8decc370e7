//! Text that can leave memory and come back.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use nova_core::{TextAndVersion, VersionStamp};
use nova_storage::{MemoryStorageService, TemporaryStorage, TemporaryStorageService};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::retained_cache::Evictable;
use crate::{LazyError, LazyValue, RetainedTextCache, SpillQueue};

static NEXT_RETAINED_ID: AtomicU64 = AtomicU64::new(1);

/// Collaborators shared by every [`RetainedText`] of a workspace.
#[derive(Debug, Clone)]
pub struct RetentionContext {
    pub storage: Arc<dyn TemporaryStorageService>,
    pub spill_queue: SpillQueue,
    pub cache: Arc<RetainedTextCache>,
}

impl RetentionContext {
    /// Spills to `storage` on the process-wide spill queue.
    pub fn new(storage: Arc<dyn TemporaryStorageService>) -> Self {
        Self {
            storage,
            spill_queue: SpillQueue::global(),
            cache: RetainedTextCache::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorageService::new()))
    }

    pub fn with_spill_queue(mut self, spill_queue: SpillQueue) -> Self {
        self.spill_queue = spill_queue;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetentionState {
    /// Held in memory and never persisted.
    Live,
    /// Evicted; the spill write is queued or running.
    PendingSpill,
    /// Persisted and released from memory. A weak reference may still
    /// resolve while other holders keep the text alive.
    Spilled,
    /// Persisted and held in memory again.
    Reloaded,
}

/// Document text that may be written to temporary storage and dropped from
/// memory under pressure.
///
/// Reads resolve the strong copy first, then the weak reference left behind
/// by a spill, and only then read temporary storage. A text is spilled at
/// most once: later evictions just drop the in-memory copy again.
#[derive(Clone)]
pub struct RetainedText {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    context: RetentionContext,
    state: Mutex<State>,
    /// Single-flight storage read shared by concurrent recoveries.
    recover: LazyValue<TextAndVersion>,
}

struct State {
    version: Option<VersionStamp>,
    strong: Option<Arc<String>>,
    weak: Weak<String>,
    storage: Option<Arc<dyn TemporaryStorage>>,
    /// Deferred initial value; dropped after its first successful load.
    loader: Option<LazyValue<TextAndVersion>>,
    spill_pending: bool,
    /// Set by an eviction, cleared by any later access.
    release_requested: bool,
    ever_read: bool,
}

impl State {
    fn resident(&self) -> Option<TextAndVersion> {
        let version = self.version?;
        let text = self.strong.clone().or_else(|| self.weak.upgrade())?;
        Some(TextAndVersion::from_shared(text, version))
    }
}

enum Access {
    Hit(TextAndVersion),
    Load(LazyValue<TextAndVersion>),
    Recover,
}

impl RetainedText {
    /// A text that is already in memory.
    pub fn new(value: TextAndVersion, context: &RetentionContext) -> Self {
        let len = value.text.len() as i64;
        let this = Self::build(
            State {
                version: Some(value.version),
                weak: Arc::downgrade(&value.text),
                strong: Some(value.text),
                storage: None,
                loader: None,
                spill_pending: false,
                release_requested: false,
                ever_read: false,
            },
            context,
        );
        context.cache.charge(len);
        this.touch();
        this
    }

    /// A text produced by `loader` on first access.
    pub fn deferred(loader: LazyValue<TextAndVersion>, context: &RetentionContext) -> Self {
        Self::build(
            State {
                version: None,
                strong: None,
                weak: Weak::new(),
                storage: None,
                loader: Some(loader),
                spill_pending: false,
                release_requested: false,
                ever_read: false,
            },
            context,
        )
    }

    fn build(state: State, context: &RetentionContext) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            Inner {
                id: NEXT_RETAINED_ID.fetch_add(1, Ordering::Relaxed),
                context: context.clone(),
                state: Mutex::new(state),
                recover: LazyValue::new_uncached(move |_| match weak.upgrade() {
                    Some(inner) => inner.reload(),
                    None => Err(LazyError::message("retained text was dropped")),
                }),
            }
        });
        Self { inner }
    }

    pub fn text_and_version(&self, cancel: &CancellationToken) -> Result<TextAndVersion, LazyError> {
        let value = match self.inner.access() {
            Access::Hit(value) => value,
            Access::Load(loader) => {
                let value = loader.get(cancel)?;
                self.inner.install_loaded(value)
            }
            Access::Recover => self.inner.recover.get(cancel)?,
        };
        self.touch();
        Ok(value)
    }

    pub async fn text_and_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TextAndVersion, LazyError> {
        let value = match self.inner.access() {
            Access::Hit(value) => value,
            Access::Load(loader) => {
                let value = loader.get_async(cancel).await?;
                self.inner.install_loaded(value)
            }
            Access::Recover => self.inner.recover.get_async(cancel).await?,
        };
        self.touch();
        Ok(value)
    }

    /// The text if it is resident, without loading or reading storage.
    pub fn try_peek(&self) -> Option<TextAndVersion> {
        self.inner.state.lock().resident()
    }

    /// The text version, once known.
    pub fn version(&self) -> Option<VersionStamp> {
        self.inner.state.lock().version
    }

    pub fn state(&self) -> RetentionState {
        let state = self.inner.state.lock();
        match (&state.strong, &state.storage) {
            _ if state.spill_pending => RetentionState::PendingSpill,
            (Some(_), None) | (None, None) => RetentionState::Live,
            (None, Some(_)) => RetentionState::Spilled,
            (Some(_), Some(_)) => RetentionState::Reloaded,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.inner.state.lock().storage.is_some()
    }

    /// Releases the in-memory copy if the text has been read at least once.
    ///
    /// Never blocks: the first eviction queues a spill write, later ones only
    /// drop the strong reference. Returns whether anything was released or
    /// scheduled.
    pub fn evict(&self) -> bool {
        Inner::request_eviction(&self.inner) > 0
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn touch(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.context.cache.touch(self.inner.id, weak);
    }
}

impl Inner {
    fn access(&self) -> Access {
        let mut state = self.state.lock();
        if let Some(value) = state.resident() {
            state.ever_read = true;
            state.release_requested = false;
            let rewrapped = state.strong.is_none();
            if rewrapped {
                state.strong = Some(value.text.clone());
            }
            drop(state);
            if rewrapped {
                self.context.cache.charge(value.text.len() as i64);
                tracing::trace!(target = "nova.cache", id = self.id, "recovered text from weak reference");
            }
            return Access::Hit(value);
        }
        match &state.loader {
            Some(loader) => Access::Load(loader.clone()),
            None => Access::Recover,
        }
    }

    fn install_loaded(&self, value: TextAndVersion) -> TextAndVersion {
        let mut state = self.state.lock();
        state.ever_read = true;
        state.release_requested = false;
        if state.loader.is_none() {
            // Another caller installed it first; keep its copy.
            return state.resident().unwrap_or(value);
        }
        state.loader = None;
        state.version = Some(value.version);
        state.weak = Arc::downgrade(&value.text);
        state.strong = Some(value.text.clone());
        drop(state);
        self.context.cache.charge(value.text.len() as i64);
        value
    }

    fn reload(&self) -> Result<TextAndVersion, LazyError> {
        let (storage, version) = {
            let mut state = self.state.lock();
            if let Some(value) = state.resident() {
                state.ever_read = true;
                return Ok(value);
            }
            (state.storage.clone(), state.version)
        };
        let (Some(storage), Some(version)) = (storage, version) else {
            return Err(LazyError::message("text is neither resident nor persisted"));
        };

        let text = Arc::new(storage.read_text().map_err(LazyError::failed)?);
        let len = text.len() as i64;

        let mut state = self.state.lock();
        state.ever_read = true;
        state.release_requested = false;
        if let Some(value) = state.resident() {
            return Ok(value);
        }
        state.weak = Arc::downgrade(&text);
        state.strong = Some(text.clone());
        drop(state);

        self.context.cache.charge(len);
        tracing::debug!(target = "nova.cache", id = self.id, bytes = len, "recovered text from storage");
        Ok(TextAndVersion::from_shared(text, version))
    }

    fn request_eviction(this: &Arc<Inner>) -> u64 {
        let mut state = this.state.lock();
        if !state.ever_read || state.spill_pending {
            return 0;
        }
        let Some(text) = state.strong.clone() else {
            return 0;
        };
        let len = text.len() as u64;

        if state.storage.is_some() {
            state.strong = None;
            drop(state);
            this.context.cache.charge(-(len as i64));
            tracing::trace!(target = "nova.cache", id = this.id, bytes = len, "released persisted text");
            return len;
        }

        state.spill_pending = true;
        state.release_requested = true;
        drop(state);

        let weak = Arc::downgrade(this);
        let cache = this.context.cache.clone();
        cache.spill_scheduled(len);
        tracing::trace!(target = "nova.cache", id = this.id, bytes = len, "spill scheduled");
        this.context.spill_queue.submit(move || {
            if let Some(inner) = weak.upgrade() {
                inner.spill(text);
            }
            cache.spill_finished(len);
        });
        len
    }

    fn spill(&self, text: Arc<String>) {
        let written = self
            .context
            .storage
            .create_storage()
            .and_then(|storage| storage.write_text(&text).map(|()| storage));

        let mut state = self.state.lock();
        state.spill_pending = false;
        let release = std::mem::take(&mut state.release_requested);
        match written {
            Ok(storage) => {
                state.storage = Some(storage);
                state.weak = Arc::downgrade(&text);
                let released = release && state.strong.take().is_some();
                drop(state);
                if released {
                    self.context.cache.charge(-(text.len() as i64));
                }
                tracing::debug!(
                    target = "nova.cache",
                    id = self.id,
                    bytes = text.len(),
                    released,
                    "spill completed"
                );
            }
            Err(err) => {
                drop(state);
                tracing::warn!(
                    target = "nova.cache",
                    id = self.id,
                    error = %err,
                    "spill failed; keeping text in memory"
                );
            }
        }
    }
}

impl Evictable for Inner {
    fn evict(self: Arc<Self>) -> u64 {
        Inner::request_eviction(&self)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(text) = state.strong.take() {
            self.context.cache.charge(-(text.len() as i64));
        }
        self.context.cache.forget(self.id);
    }
}

impl fmt::Debug for RetainedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainedText")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_storage::{StorageError, StorageStats};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn context(storage: Arc<dyn TemporaryStorageService>) -> RetentionContext {
        RetentionContext::new(storage).with_spill_queue(SpillQueue::new("spill-test"))
    }

    fn text(value: &str) -> TextAndVersion {
        TextAndVersion::new(value.to_string(), VersionStamp::create())
    }

    fn read(retained: &RetainedText) -> TextAndVersion {
        retained.text_and_version(&CancellationToken::new()).unwrap()
    }

    #[test]
    fn unread_text_is_never_evicted() {
        let storage = Arc::new(MemoryStorageService::new());
        let ctx = context(storage.clone());
        let retained = RetainedText::new(text("class A {}"), &ctx);

        assert!(!retained.evict());
        ctx.spill_queue.flush();
        assert_eq!(retained.state(), RetentionState::Live);
        assert_eq!(storage.stats().writes, 0);
    }

    #[test]
    fn weak_recovery_does_not_touch_storage() {
        let storage = Arc::new(MemoryStorageService::new());
        let ctx = context(storage.clone());
        let retained = RetainedText::new(text("fn main() {}"), &ctx);
        let held = read(&retained);

        assert!(retained.evict());
        ctx.spill_queue.flush();
        assert_eq!(retained.state(), RetentionState::Spilled);
        assert_eq!(ctx.cache.live_bytes(), 0);

        let recovered = read(&retained);
        assert!(Arc::ptr_eq(&recovered.text, &held.text));
        assert_eq!(storage.stats(), StorageStats { writes: 1, reads: 0 });
        assert_eq!(retained.state(), RetentionState::Reloaded);
    }

    #[test]
    fn storage_recovery_and_second_eviction_do_not_rewrite() {
        let storage = Arc::new(MemoryStorageService::new());
        let ctx = context(storage.clone());
        let original = text("interface I { fn f(); }");
        let version = original.version;
        let retained = RetainedText::new(original, &ctx);
        read(&retained);

        retained.evict();
        ctx.spill_queue.flush();
        assert_eq!(retained.try_peek(), None);

        let recovered = read(&retained);
        assert_eq!(recovered.text.as_str(), "interface I { fn f(); }");
        assert_eq!(recovered.version, version);
        assert_eq!(storage.stats(), StorageStats { writes: 1, reads: 1 });

        assert!(retained.evict());
        assert_eq!(retained.state(), RetentionState::Spilled);
        drop(recovered);
        ctx.spill_queue.flush();
        assert_eq!(storage.stats().writes, 1);
    }

    #[test]
    fn eviction_is_scheduled_once() {
        let storage = Arc::new(MemoryStorageService::new());
        let ctx = context(storage.clone());
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        ctx.spill_queue.submit(move || {
            let _ = release_rx.recv();
        });

        let retained = RetainedText::new(text("x;"), &ctx);
        read(&retained);
        assert!(retained.evict());
        assert_eq!(retained.state(), RetentionState::PendingSpill);
        assert!(!retained.evict());

        release_tx.send(()).unwrap();
        ctx.spill_queue.flush();
        assert_eq!(storage.stats().writes, 1);
    }

    #[test]
    fn access_during_pending_spill_keeps_text_resident() {
        let storage = Arc::new(MemoryStorageService::new());
        let ctx = context(storage.clone());
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        ctx.spill_queue.submit(move || {
            let _ = release_rx.recv();
        });

        let retained = RetainedText::new(text("y;"), &ctx);
        read(&retained);
        retained.evict();
        read(&retained);

        release_tx.send(()).unwrap();
        ctx.spill_queue.flush();
        assert!(retained.is_persisted());
        assert_eq!(retained.state(), RetentionState::Reloaded);
        assert_eq!(ctx.cache.live_bytes(), 2);
    }

    #[derive(Debug, Default)]
    struct BrokenStorageService {
        fail_writes: bool,
    }

    #[derive(Debug)]
    struct BrokenStorage {
        fail_writes: bool,
        written: Mutex<bool>,
    }

    impl TemporaryStorageService for BrokenStorageService {
        fn create_storage(&self) -> Result<Arc<dyn TemporaryStorage>, StorageError> {
            Ok(Arc::new(BrokenStorage {
                fail_writes: self.fail_writes,
                written: Mutex::new(false),
            }))
        }

        fn stats(&self) -> StorageStats {
            StorageStats::default()
        }
    }

    impl TemporaryStorage for BrokenStorage {
        fn write_text(&self, _: &str) -> Result<(), StorageError> {
            if self.fail_writes {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            *self.written.lock() = true;
            Ok(())
        }

        fn read_text(&self) -> Result<String, StorageError> {
            Err(StorageError::HashMismatch {
                expected: 1,
                found: 2,
            })
        }

        fn is_written(&self) -> bool {
            *self.written.lock()
        }
    }

    #[test]
    fn failed_spill_keeps_text_in_memory() {
        let ctx = context(Arc::new(BrokenStorageService { fail_writes: true }));
        let retained = RetainedText::new(text("z;"), &ctx);
        read(&retained);

        retained.evict();
        ctx.spill_queue.flush();
        assert_eq!(retained.state(), RetentionState::Live);
        assert_eq!(read(&retained).text.as_str(), "z;");
    }

    #[test]
    fn failed_storage_read_is_a_hard_error() {
        let ctx = context(Arc::new(BrokenStorageService::default()));
        let retained = RetainedText::new(text("w;"), &ctx);
        drop(read(&retained));

        retained.evict();
        ctx.spill_queue.flush();
        let err = retained
            .text_and_version(&CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::HashMismatch { .. })
        ));
    }

    #[test]
    fn deferred_text_loads_once() {
        let ctx = context(Arc::new(MemoryStorageService::new()));
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let loader = LazyValue::new_uncached(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(text("loaded;"))
        });
        let retained = RetainedText::deferred(loader, &ctx);

        assert_eq!(retained.version(), None);
        assert_eq!(retained.try_peek(), None);
        assert_eq!(read(&retained).text.as_str(), "loaded;");
        assert_eq!(read(&retained).text.as_str(), "loaded;");
        assert!(retained.version().is_some());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_load_is_retryable() {
        let ctx = context(Arc::new(MemoryStorageService::new()));
        let retained = RetainedText::deferred(LazyValue::new_uncached(|_| Ok(text("a;"))), &ctx);
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        assert!(retained.text_and_version(&cancelled).unwrap_err().is_cancelled());
        assert_eq!(read(&retained).text.as_str(), "a;");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn async_recovery_reads_storage() {
        let storage = Arc::new(MemoryStorageService::new());
        let ctx = context(storage.clone());
        let retained = RetainedText::new(text("async;"), &ctx);
        drop(read(&retained));
        retained.evict();
        ctx.spill_queue.flush();

        let cancel = CancellationToken::new();
        let (a, b) = tokio::join!(
            retained.text_and_version_async(&cancel),
            retained.text_and_version_async(&cancel)
        );
        assert_eq!(a.unwrap().text.as_str(), "async;");
        assert_eq!(b.unwrap().text.as_str(), "async;");
        assert_eq!(storage.stats().reads, 1);
    }

    #[test]
    fn dropping_the_text_releases_its_bytes() {
        let ctx = context(Arc::new(MemoryStorageService::new()));
        let retained = RetainedText::new(text("0123456789"), &ctx);
        assert_eq!(ctx.cache.live_bytes(), 10);
        assert_eq!(ctx.cache.len(), 1);

        drop(retained);
        assert_eq!(ctx.cache.live_bytes(), 0);
        assert!(ctx.cache.is_empty());
    }
}
