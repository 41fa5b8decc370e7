use std::sync::Arc;

use nova_cache::{CancellationToken, RetainedText, RetentionContext, RetentionState, SpillQueue};
use nova_core::{TextAndVersion, VersionStamp};
use nova_storage::{FileStorageService, TemporaryStorageService};

fn large_text() -> String {
    "namespace N { class C { fn f() { body; } } }\n".repeat(4096)
}

#[test]
fn spilled_text_round_trips_through_compressed_files() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorageService::new(dir.path(), 1024).unwrap());
    let ctx = RetentionContext::new(storage.clone()).with_spill_queue(SpillQueue::new("spill-file"));

    let version = VersionStamp::create();
    let retained = RetainedText::new(TextAndVersion::new(large_text(), version), &ctx);
    drop(retained.text_and_version(&CancellationToken::new()).unwrap());

    assert!(retained.evict());
    ctx.spill_queue.flush();
    assert_eq!(retained.state(), RetentionState::Spilled);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    let recovered = retained.text_and_version(&CancellationToken::new()).unwrap();
    assert_eq!(recovered.version, version);
    assert_eq!(recovered.text.as_str(), large_text());
    assert_eq!(storage.stats().reads, 1);
    assert_eq!(storage.stats().writes, 1);

    drop(recovered);
    drop(retained);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn many_texts_spill_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorageService::new(dir.path(), usize::MAX).unwrap());
    let ctx = RetentionContext::new(storage.clone()).with_spill_queue(SpillQueue::new("spill-file"));
    let cancel = CancellationToken::new();

    let texts: Vec<_> = (0..16)
        .map(|i| {
            let retained = RetainedText::new(
                TextAndVersion::new(format!("fn f{i}() {{ {i}; }}"), VersionStamp::create()),
                &ctx,
            );
            drop(retained.text_and_version(&cancel).unwrap());
            retained
        })
        .collect();

    for retained in &texts {
        assert!(retained.evict());
    }
    ctx.spill_queue.flush();

    for (i, retained) in texts.iter().enumerate() {
        assert_eq!(retained.state(), RetentionState::Spilled);
        let value = retained.text_and_version(&cancel).unwrap();
        assert_eq!(value.text.as_str(), format!("fn f{i}() {{ {i}; }}"));
    }
    assert_eq!(storage.stats().writes, 16);
}
