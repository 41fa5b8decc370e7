use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use nova_memory::{
    EvictionRequest, EvictionResult, MemoryCategory, MemoryEvictor, MemoryManager,
    MemoryRegistration,
};
use parking_lot::Mutex;

/// Something whose in-memory copy can be released.
pub(crate) trait Evictable: Send + Sync {
    /// Starts releasing the in-memory copy and returns the number of bytes
    /// that will be freed, or 0 when nothing can be released right now.
    fn evict(self: Arc<Self>) -> u64;
}

/// Least-recently-used index of the retained texts that hold memory.
///
/// Registered with the [`MemoryManager`] as the [`MemoryCategory::SourceText`]
/// evictor. Bytes are accounted while a text's strong copy is resident;
/// eviction only schedules spills, so the tracked usage drops once the spill
/// queue has actually released the text.
pub struct RetainedTextCache {
    lru: Mutex<Lru>,
    live_bytes: AtomicU64,
    /// Resident bytes whose spill is queued but not finished.
    pending_bytes: AtomicU64,
    registration: Mutex<Option<MemoryRegistration>>,
}

#[derive(Default)]
struct Lru {
    clock: u64,
    by_age: BTreeMap<u64, u64>,
    entries: HashMap<u64, LruEntry>,
}

struct LruEntry {
    tick: u64,
    text: Weak<dyn Evictable>,
}

impl RetainedTextCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lru: Mutex::new(Lru::default()),
            live_bytes: AtomicU64::new(0),
            pending_bytes: AtomicU64::new(0),
            registration: Mutex::new(None),
        })
    }

    /// Registers this cache as the source text evictor of `memory`.
    pub fn register(self: &Arc<Self>, memory: &MemoryManager) {
        let registration = memory.register_evictor(
            "retained-text",
            MemoryCategory::SourceText,
            self.clone() as Arc<dyn MemoryEvictor>,
        );
        registration.tracker().set_bytes(self.live_bytes());
        *self.registration.lock() = Some(registration);
    }

    /// Bytes of text currently held in memory by retained texts.
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lru.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident bytes already scheduled for release by a queued spill.
    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes.load(Ordering::SeqCst)
    }

    /// Asks least recently used texts to release memory until the resident
    /// bytes, minus spills already queued, fit in `target_bytes`.
    /// Returns the number of bytes scheduled for release.
    pub fn evict_to(&self, target_bytes: u64) -> u64 {
        let candidates: Vec<Arc<dyn Evictable>> = {
            let mut lru = self.lru.lock();
            let mut dead = Vec::new();
            let candidates = lru
                .by_age
                .iter()
                .filter_map(|(_, id)| match lru.entries.get(id) {
                    Some(entry) => match entry.text.upgrade() {
                        Some(text) => Some(text),
                        None => {
                            dead.push(*id);
                            None
                        }
                    },
                    None => None,
                })
                .collect();
            for id in dead {
                lru.remove(id);
            }
            candidates
        };

        let mut projected = self.live_bytes().saturating_sub(self.pending_bytes());
        let mut scheduled = 0;
        for text in candidates {
            if projected <= target_bytes {
                break;
            }
            let freed = text.evict();
            projected = projected.saturating_sub(freed);
            scheduled += freed;
        }

        tracing::debug!(
            target = "nova.cache",
            target_bytes,
            scheduled_bytes = scheduled,
            live_bytes = self.live_bytes(),
            "retained text eviction"
        );
        scheduled
    }

    pub(crate) fn touch(&self, id: u64, text: Weak<dyn Evictable>) {
        let mut lru = self.lru.lock();
        lru.clock += 1;
        let tick = lru.clock;
        if let Some(previous) = lru.entries.insert(id, LruEntry { tick, text }) {
            lru.by_age.remove(&previous.tick);
        }
        lru.by_age.insert(tick, id);
    }

    pub(crate) fn forget(&self, id: u64) {
        self.lru.lock().remove(id);
    }

    pub(crate) fn spill_scheduled(&self, bytes: u64) {
        self.pending_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn spill_finished(&self, bytes: u64) {
        let _ = self
            .pending_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                Some(pending.saturating_sub(bytes))
            });
    }

    pub(crate) fn charge(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        let bytes = if delta > 0 {
            self.live_bytes.fetch_add(delta as u64, Ordering::SeqCst) + delta as u64
        } else {
            let released = delta.unsigned_abs();
            let previous = self
                .live_bytes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bytes| {
                    Some(bytes.saturating_sub(released))
                })
                .unwrap_or_default();
            previous.saturating_sub(released)
        };
        if let Some(registration) = self.registration.lock().as_ref() {
            registration.tracker().set_bytes(bytes);
        }
    }
}

impl Lru {
    fn remove(&mut self, id: u64) {
        if let Some(entry) = self.entries.remove(&id) {
            self.by_age.remove(&entry.tick);
        }
    }
}

impl MemoryEvictor for RetainedTextCache {
    fn name(&self) -> &str {
        "retained-text"
    }

    fn category(&self) -> MemoryCategory {
        MemoryCategory::SourceText
    }

    fn evict(&self, request: EvictionRequest) -> EvictionResult {
        let before_bytes = self.live_bytes();
        self.evict_to(request.target_bytes);
        EvictionResult {
            before_bytes,
            after_bytes: self.live_bytes(),
        }
    }
}

impl fmt::Debug for RetainedTextCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainedTextCache")
            .field("entries", &self.len())
            .field("live_bytes", &self.live_bytes())
            .field("pending_bytes", &self.pending_bytes())
            .finish()
    }
}
