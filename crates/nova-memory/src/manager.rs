use crate::budget::MemoryBudget;
use crate::eviction::{EvictionRequest, MemoryEvictor};
use crate::pressure::{MemoryPressure, MemoryPressureThresholds};
use crate::process;
use crate::report::{ComponentUsage, MemoryReport};
use crate::types::{MemoryBreakdown, MemoryCategory};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type MemoryEventListener = Arc<dyn Fn(MemoryEvent) + Send + Sync>;

const MAX_EVICTION_ROUNDS: usize = 3;

struct RegistrationEntry {
    name: String,
    category: MemoryCategory,
    usage_bytes: Arc<AtomicU64>,
    evictor: Option<Arc<dyn MemoryEvictor>>,
}

#[derive(Clone)]
struct EvictorEntry {
    category: MemoryCategory,
    usage_bytes: Arc<AtomicU64>,
    evictor: Arc<dyn MemoryEvictor>,
}

impl EvictorEntry {
    fn bytes(&self) -> u64 {
        self.usage_bytes.load(Ordering::Relaxed)
    }
}

struct Inner {
    budget: MemoryBudget,
    options: MemoryManagerOptions,
    next_id: AtomicU64,
    registrations: Mutex<HashMap<u64, RegistrationEntry>>,
    pressure: Mutex<MemoryPressure>,
    listeners: Mutex<Vec<MemoryEventListener>>,
}

/// Tuning knobs for [`MemoryManager`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryManagerOptions {
    pub thresholds: MemoryPressureThresholds,
    /// Use the process RSS as a lower bound for total usage.
    ///
    /// Off by default so tracked usage alone drives pressure, which keeps
    /// enforcement deterministic.
    pub sample_process_rss: bool,
}

/// Emitted when enforcement moves the pressure level.
#[derive(Debug, Clone)]
pub struct MemoryEvent {
    pub previous_pressure: MemoryPressure,
    pub pressure: MemoryPressure,
    pub report: MemoryReport,
}

/// Central coordinator for memory budgeting and eviction.
///
/// Cheap to clone; clones share registrations and listeners.
#[derive(Clone)]
pub struct MemoryManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("budget", &self.inner.budget)
            .field("pressure", &*self.inner.pressure.lock())
            .finish_non_exhaustive()
    }
}

impl MemoryManager {
    pub fn new(budget: MemoryBudget) -> Self {
        Self::with_options(budget, MemoryManagerOptions::default())
    }

    pub fn with_options(budget: MemoryBudget, options: MemoryManagerOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                budget,
                options,
                next_id: AtomicU64::new(1),
                registrations: Mutex::new(HashMap::new()),
                pressure: Mutex::new(MemoryPressure::Low),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    pub fn subscribe(&self, listener: MemoryEventListener) {
        self.inner.listeners.lock().push(listener);
    }

    /// Register a component for accounting only.
    pub fn register_tracker(
        &self,
        name: impl Into<String>,
        category: MemoryCategory,
    ) -> MemoryRegistration {
        self.register(name.into(), category, None)
    }

    /// Register a component for accounting and eviction.
    pub fn register_evictor(
        &self,
        name: impl Into<String>,
        category: MemoryCategory,
        evictor: Arc<dyn MemoryEvictor>,
    ) -> MemoryRegistration {
        self.register(name.into(), category, Some(evictor))
    }

    fn register(
        &self,
        name: String,
        category: MemoryCategory,
        evictor: Option<Arc<dyn MemoryEvictor>>,
    ) -> MemoryRegistration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let usage_bytes = Arc::new(AtomicU64::new(0));

        self.inner.registrations.lock().insert(
            id,
            RegistrationEntry {
                name: name.clone(),
                category,
                usage_bytes: usage_bytes.clone(),
                evictor,
            },
        );

        MemoryRegistration {
            id,
            name,
            category,
            usage_bytes,
            manager: Arc::downgrade(&self.inner),
        }
    }

    /// Current pressure level (no eviction).
    pub fn pressure(&self) -> MemoryPressure {
        let usage = self.usage_breakdown();
        self.pressure_for(usage.total(), self.sample_rss())
    }

    /// Snapshot of current memory state (no eviction).
    pub fn report(&self) -> MemoryReport {
        let usage = self.usage_breakdown();
        let rss_bytes = self.sample_rss();
        MemoryReport {
            budget: self.inner.budget,
            usage,
            rss_bytes,
            pressure: self.pressure_for(usage.total(), rss_bytes),
        }
    }

    /// Per-component usage, largest first.
    pub fn components(&self) -> Vec<ComponentUsage> {
        let mut components: Vec<ComponentUsage> = self
            .inner
            .registrations
            .lock()
            .values()
            .map(|entry| ComponentUsage {
                name: entry.name.clone(),
                category: entry.category,
                bytes: entry.usage_bytes.load(Ordering::Relaxed),
            })
            .collect();

        components.sort_by(|a, b| {
            b.bytes
                .cmp(&a.bytes)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.category.cmp(&b.category))
        });
        components
    }

    /// Recompute pressure and ask evictors to shrink if needed.
    ///
    /// Synchronous and deterministic for a given set of tracked usages.
    /// Evictors must not block here; spilling components schedule their
    /// writes and return.
    pub fn enforce(&self) -> MemoryReport {
        let before = self.report();

        if before.pressure >= MemoryPressure::High {
            self.flush_evictors();
        }

        let target = self
            .inner
            .budget
            .categories
            .scaled(before.pressure.eviction_target_ratio());
        let entries = self.evictor_entries();

        for _ in 0..MAX_EVICTION_ROUNDS {
            let usage = self.usage_breakdown();
            let target = compensated_target(usage, target, &entries);
            if usage.within(target) {
                break;
            }
            evict_once(before.pressure, usage, target, &entries);
        }

        let after = self.report();
        tracing::debug!(
            target = "nova.memory",
            before = ?before.pressure,
            after = ?after.pressure,
            before_bytes = before.usage_total_bytes(),
            after_bytes = after.usage_total_bytes(),
            "memory enforcement finished"
        );

        self.publish(after.clone());
        after
    }

    fn flush_evictors(&self) {
        for entry in self.evictor_entries() {
            if let Err(err) = entry.evictor.flush_to_disk() {
                tracing::debug!(
                    target = "nova.memory",
                    evictor = entry.evictor.name(),
                    error = %err,
                    "flush before eviction failed"
                );
            }
        }
    }

    fn evictor_entries(&self) -> Vec<EvictorEntry> {
        self.inner
            .registrations
            .lock()
            .values()
            .filter_map(|entry| {
                entry.evictor.as_ref().map(|evictor| EvictorEntry {
                    category: entry.category,
                    usage_bytes: entry.usage_bytes.clone(),
                    evictor: evictor.clone(),
                })
            })
            .collect()
    }

    fn publish(&self, report: MemoryReport) {
        let previous_pressure = {
            let mut pressure = self.inner.pressure.lock();
            if *pressure == report.pressure {
                return;
            }
            std::mem::replace(&mut *pressure, report.pressure)
        };

        let listeners = self.inner.listeners.lock().clone();
        let event = MemoryEvent {
            previous_pressure,
            pressure: report.pressure,
            report,
        };
        for listener in listeners {
            listener(event.clone());
        }
    }

    fn sample_rss(&self) -> Option<u64> {
        if self.inner.options.sample_process_rss {
            process::current_rss_bytes()
        } else {
            None
        }
    }

    fn pressure_for(&self, tracked_total: u64, rss_bytes: Option<u64>) -> MemoryPressure {
        let effective = rss_bytes.map_or(tracked_total, |rss| tracked_total.max(rss));
        self.inner
            .options
            .thresholds
            .level_for_usage(effective, self.inner.budget.total)
    }

    fn usage_breakdown(&self) -> MemoryBreakdown {
        let mut breakdown = MemoryBreakdown::default();
        for entry in self.inner.registrations.lock().values() {
            breakdown.add(entry.category, entry.usage_bytes.load(Ordering::Relaxed));
        }
        breakdown
    }
}

/// Splits each over-budget category's evictable allowance across its
/// evictors in proportion to their current usage.
fn evict_once(
    pressure: MemoryPressure,
    usage: MemoryBreakdown,
    target: MemoryBreakdown,
    entries: &[EvictorEntry],
) {
    for category in MemoryCategory::ALL {
        let category_usage = usage.get(category);
        let category_target = target.get(category);
        if category_usage <= category_target {
            continue;
        }

        let candidates: Vec<(u64, &EvictorEntry)> = entries
            .iter()
            .filter(|entry| entry.category == category)
            .map(|entry| (entry.bytes(), entry))
            .collect();
        let evictable: u64 = candidates.iter().map(|(bytes, _)| *bytes).sum();
        if evictable == 0 {
            continue;
        }

        let non_evictable = category_usage.saturating_sub(evictable);
        let evictable_target = category_target.max(non_evictable) - non_evictable;

        for (bytes, entry) in candidates {
            let share = (bytes as u128) * (evictable_target as u128) / (evictable.max(1) as u128);
            let result = entry.evictor.evict(EvictionRequest {
                pressure,
                target_bytes: share as u64,
            });
            tracing::trace!(
                target = "nova.memory",
                evictor = entry.evictor.name(),
                freed = result.freed_bytes(),
                "evictor ran"
            );
        }
    }
}

/// Per-category targets adjusted for memory nobody can evict.
///
/// Untracked or accounting-only usage (for example texts that are pinned
/// by open snapshots) can push a category over budget with no evictor to
/// relieve it. The remaining global allowance is then shared among the
/// evictable usage of every category, so pressure in one category can drive
/// eviction in another.
fn compensated_target(
    usage: MemoryBreakdown,
    target: MemoryBreakdown,
    entries: &[EvictorEntry],
) -> MemoryBreakdown {
    let mut evictable = MemoryBreakdown::default();
    for entry in entries {
        evictable.add(entry.category, entry.bytes());
    }

    let mut pinned = MemoryBreakdown::default();
    for category in MemoryCategory::ALL {
        pinned.set(
            category,
            usage.get(category).saturating_sub(evictable.get(category)),
        );
    }

    let global_allowance = target.total().saturating_sub(pinned.total());

    let mut keep = MemoryBreakdown::default();
    for category in MemoryCategory::ALL {
        let max_keep = target.get(category).saturating_sub(pinned.get(category));
        keep.set(category, evictable.get(category).min(max_keep));
    }

    let desired = keep.total();
    if desired > global_allowance && desired > 0 {
        for category in MemoryCategory::ALL {
            let scaled =
                (keep.get(category) as u128) * (global_allowance as u128) / (desired as u128);
            keep.set(category, scaled as u64);
        }
    }

    let mut compensated = MemoryBreakdown::default();
    for category in MemoryCategory::ALL {
        compensated.set(
            category,
            pinned.get(category).saturating_add(keep.get(category)),
        );
    }
    compensated
}

/// Handle kept by the registering component; dropping it unregisters the
/// component and removes its contribution from accounting.
pub struct MemoryRegistration {
    id: u64,
    name: String,
    category: MemoryCategory,
    usage_bytes: Arc<AtomicU64>,
    manager: Weak<Inner>,
}

impl MemoryRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> MemoryCategory {
        self.category
    }

    pub fn tracker(&self) -> MemoryTracker {
        MemoryTracker {
            usage_bytes: self.usage_bytes.clone(),
        }
    }
}

impl std::fmt::Debug for MemoryRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("category", &self.category)
            .field("usage_bytes", &self.usage_bytes.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for MemoryRegistration {
    fn drop(&mut self) {
        self.usage_bytes.store(0, Ordering::Relaxed);
        if let Some(manager) = self.manager.upgrade() {
            manager.registrations.lock().remove(&self.id);
        }
    }
}

/// Per-component accounting handle.
#[derive(Clone)]
pub struct MemoryTracker {
    usage_bytes: Arc<AtomicU64>,
}

impl MemoryTracker {
    pub fn set_bytes(&self, bytes: u64) {
        self.usage_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, delta: i64) {
        let _ = self
            .usage_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if delta >= 0 {
                    current.saturating_add(delta as u64)
                } else {
                    current.saturating_sub(delta.unsigned_abs())
                })
            });
    }

    pub fn bytes(&self) -> u64 {
        self.usage_bytes.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MemoryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTracker")
            .field("bytes", &self.bytes())
            .finish()
    }
}
