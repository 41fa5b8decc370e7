use nova_memory::{
    EvictionRequest, EvictionResult, MemoryBudget, MemoryCategory, MemoryEvent, MemoryEvictor,
    MemoryManager, MemoryPressure, MemoryRegistration, MemoryTracker,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

struct TestEvictor {
    name: String,
    category: MemoryCategory,
    bytes: Mutex<u64>,
    flushes: AtomicUsize,
    registration: OnceLock<MemoryRegistration>,
    tracker: OnceLock<MemoryTracker>,
}

impl TestEvictor {
    fn new(manager: &MemoryManager, name: &str, category: MemoryCategory) -> Arc<Self> {
        let evictor = Arc::new(Self {
            name: name.to_string(),
            category,
            bytes: Mutex::new(0),
            flushes: AtomicUsize::new(0),
            registration: OnceLock::new(),
            tracker: OnceLock::new(),
        });

        let registration = manager.register_evictor(name.to_string(), category, evictor.clone());
        evictor
            .tracker
            .set(registration.tracker())
            .unwrap_or_else(|_| panic!("tracker only set once"));
        evictor
            .registration
            .set(registration)
            .unwrap_or_else(|_| panic!("registration only set once"));

        evictor
    }

    fn set_bytes(&self, bytes: u64) {
        *self.bytes.lock().unwrap() = bytes;
        self.tracker.get().unwrap().set_bytes(bytes);
    }

    fn add_bytes(&self, delta: u64) {
        let mut bytes = self.bytes.lock().unwrap();
        *bytes = bytes.saturating_add(delta);
        self.tracker.get().unwrap().set_bytes(*bytes);
    }

    fn bytes(&self) -> u64 {
        *self.bytes.lock().unwrap()
    }
}

impl MemoryEvictor for TestEvictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> MemoryCategory {
        self.category
    }

    fn evict(&self, request: EvictionRequest) -> EvictionResult {
        let mut bytes = self.bytes.lock().unwrap();
        let before = *bytes;
        let after = before.min(request.target_bytes);
        *bytes = after;
        self.tracker.get().unwrap().set_bytes(after);
        EvictionResult {
            before_bytes: before,
            after_bytes: after,
        }
    }

    fn flush_to_disk(&self) -> std::io::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn evicts_over_category_budget_even_under_low_pressure() {
    let budget = MemoryBudget::from_total(1_000);
    let manager = MemoryManager::new(budget);

    let texts = TestEvictor::new(&manager, "retained_text", MemoryCategory::SourceText);
    texts.set_bytes(500);

    assert_eq!(manager.pressure(), MemoryPressure::Low);

    let report = manager.enforce();
    assert_eq!(texts.bytes(), budget.categories.source_text);
    assert_eq!(report.pressure, MemoryPressure::Low);
    assert_eq!(texts.flushes.load(Ordering::SeqCst), 0);
}

#[test]
fn pinned_memory_drives_eviction_in_other_categories() {
    let budget = MemoryBudget::from_total(1_000);
    let manager = MemoryManager::new(budget);

    let events: Arc<Mutex<Vec<MemoryEvent>>> = Arc::new(Mutex::new(Vec::new()));
    manager.subscribe({
        let events = events.clone();
        Arc::new(move |event: MemoryEvent| {
            events.lock().unwrap().push(event);
        })
    });

    let pinned = manager.register_tracker("open_snapshots", MemoryCategory::Other);
    pinned.tracker().set_bytes(900);

    let texts = TestEvictor::new(&manager, "retained_text", MemoryCategory::SourceText);
    texts.set_bytes(200);

    let report = manager.enforce();

    // Critical pressure empties every evictable component.
    assert_eq!(texts.bytes(), 0);
    assert_eq!(texts.flushes.load(Ordering::SeqCst), 1);

    // What is left cannot be evicted and keeps pressure high.
    assert_eq!(report.pressure, MemoryPressure::High);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous_pressure, MemoryPressure::Low);
    assert_eq!(events[0].pressure, report.pressure);
    assert_eq!(events[0].report, report);
}

#[test]
fn medium_pressure_scales_targets() {
    let budget = MemoryBudget::from_total(1_000);
    let manager = MemoryManager::new(budget);

    let texts = TestEvictor::new(&manager, "retained_text", MemoryCategory::SourceText);
    let trees = TestEvictor::new(&manager, "syntax_trees", MemoryCategory::SyntaxTrees);
    texts.set_bytes(600);
    trees.set_bytes(200);

    // 800/1000 is medium pressure for default thresholds.
    let report = manager.enforce();

    assert_eq!(texts.bytes(), 280);
    assert_eq!(trees.bytes(), 200);
    assert_eq!(report.pressure, MemoryPressure::Low);
}

#[test]
fn synthetic_growth_is_bounded_by_budget() {
    let budget = MemoryBudget::from_total(1_000);
    let manager = MemoryManager::new(budget);

    let texts = TestEvictor::new(&manager, "retained_text", MemoryCategory::SourceText);

    for _ in 0..50 {
        texts.add_bytes(50);
        manager.enforce();
        assert!(texts.bytes() <= budget.categories.source_text);
    }
}

#[test]
fn dropping_a_registration_removes_its_usage() {
    let manager = MemoryManager::new(MemoryBudget::from_total(1_000));

    let artifacts = manager.register_tracker("artifacts", MemoryCategory::DerivedArtifacts);
    artifacts.tracker().set_bytes(150);
    let other = manager.register_tracker("misc", MemoryCategory::Other);
    other.tracker().add_bytes(20);
    other.tracker().add_bytes(-5);

    let components = manager.components();
    assert_eq!(components.len(), 2);
    assert_eq!(components[0].name, "artifacts");
    assert_eq!(components[1].bytes, 15);

    drop(artifacts);
    assert_eq!(manager.report().usage.derived_artifacts, 0);
    assert_eq!(manager.report().usage_total_bytes(), 15);
}

#[test]
fn report_serializes_to_json() {
    let manager = MemoryManager::new(MemoryBudget::from_total(1_000));
    let report = manager.report();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["pressure"], "low");
    assert_eq!(json["budget"]["categories"]["source_text"], 400);
}
