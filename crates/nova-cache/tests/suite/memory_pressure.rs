use std::sync::Arc;

use nova_cache::{CancellationToken, RetainedText, RetentionContext, RetentionState, SpillQueue};
use nova_core::{TextAndVersion, VersionStamp};
use nova_memory::{MemoryBudget, MemoryCategory, MemoryManager, MemoryPressure};
use nova_storage::{MemoryStorageService, TemporaryStorageService};

fn retained(ctx: &RetentionContext, len: usize) -> RetainedText {
    let text = RetainedText::new(TextAndVersion::new("x".repeat(len), VersionStamp::create()), ctx);
    drop(text.text_and_version(&CancellationToken::new()).unwrap());
    text
}

#[test]
fn memory_enforcement_spills_least_recently_used_texts() {
    let storage = Arc::new(MemoryStorageService::new());
    let ctx = RetentionContext::new(storage.clone()).with_spill_queue(SpillQueue::new("spill-memory"));
    // 40% of the total goes to source text: a 400 byte budget.
    let memory = MemoryManager::new(MemoryBudget::from_total(1_000));
    ctx.cache.register(&memory);

    let cold = retained(&ctx, 300);
    let warm = retained(&ctx, 300);
    assert_eq!(memory.report().usage.get(MemoryCategory::SourceText), 600);

    memory.enforce();
    ctx.spill_queue.flush();

    assert_eq!(cold.state(), RetentionState::Spilled);
    assert_eq!(warm.state(), RetentionState::Live);
    assert_eq!(ctx.cache.live_bytes(), 300);
    assert_eq!(memory.report().usage.get(MemoryCategory::SourceText), 300);
    assert_eq!(storage.stats().writes, 1);

    let recovered = cold.text_and_version(&CancellationToken::new()).unwrap();
    assert_eq!(recovered.text.len(), 300);
    assert_eq!(cold.state(), RetentionState::Reloaded);
}

#[test]
fn unread_texts_survive_pressure() {
    let ctx = RetentionContext::in_memory().with_spill_queue(SpillQueue::new("spill-memory"));
    let memory = MemoryManager::new(MemoryBudget::from_total(100));
    ctx.cache.register(&memory);

    let unread =
        RetainedText::new(TextAndVersion::new("y".repeat(500), VersionStamp::create()), &ctx);
    assert!(memory.pressure() >= MemoryPressure::High);

    memory.enforce();
    ctx.spill_queue.flush();
    assert_eq!(unread.state(), RetentionState::Live);
    assert_eq!(ctx.cache.live_bytes(), 500);
}
