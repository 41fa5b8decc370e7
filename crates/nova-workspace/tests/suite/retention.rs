use std::sync::Arc;

use nova_cache::{RetentionContext, RetentionState, SpillQueue};
use nova_config::{MemoryConfig, WorkspaceModelConfig};
use nova_storage::{MemoryStorageService, TemporaryStorageService};
use nova_syntax::OUTLINE_LANGUAGE;
use nova_workspace::{
    CancellationToken, DocumentId, DocumentInfo, ProjectId, ProjectInfo, Workspace,
    WorkspaceServices,
};
use pretty_assertions::assert_eq;

/// 40% of a 1000 byte budget: 400 bytes of source text fit in memory.
fn tight_services(storage: Arc<MemoryStorageService>) -> WorkspaceServices {
    let config = WorkspaceModelConfig {
        memory: MemoryConfig {
            total_budget_bytes: Some(1_000),
            ..MemoryConfig::default()
        },
        ..WorkspaceModelConfig::default()
    };
    let retention =
        RetentionContext::new(storage.clone()).with_spill_queue(SpillQueue::new("workspace-spill"));
    WorkspaceServices::with_storage(config, storage).with_retention(retention)
}

fn large_body() -> String {
    format!("fn f() {{ {}}}", "step; ".repeat(400))
}

#[test]
fn evicted_text_is_spilled_once_and_recovered() {
    let storage = Arc::new(MemoryStorageService::new());
    let services = tight_services(storage.clone());
    let workspace = Workspace::new(services.clone());
    let project = ProjectId::new_unique();
    let document = DocumentId::new_unique(project);
    let text = large_body();

    let solution = workspace
        .update(|solution| {
            solution.add_project(ProjectInfo::new(project, "p", OUTLINE_LANGUAGE).document(
                DocumentInfo::with_text(document, "big.outline", text.clone()),
            ))
        })
        .unwrap();
    let doc = solution.document(document).unwrap().clone();
    let cancel = CancellationToken::new();
    let version = doc.text_and_version(&cancel).unwrap().version;

    workspace.enforce_memory();
    services.retention().spill_queue.flush();
    assert_eq!(doc.retained_text().state(), RetentionState::Spilled);
    assert_eq!(storage.stats().writes, 1);
    assert_eq!(doc.try_text_and_version(), None);

    let recovered = doc.text_and_version(&cancel).unwrap();
    assert_eq!(recovered.text.as_str(), text);
    assert_eq!(recovered.version, version);
    assert_eq!(doc.retained_text().state(), RetentionState::Reloaded);
    assert_eq!(storage.stats().reads, 1);
    drop(recovered);

    workspace.enforce_memory();
    services.retention().spill_queue.flush();
    assert_eq!(doc.retained_text().state(), RetentionState::Spilled);
    assert_eq!(storage.stats().writes, 1);
}

#[test]
fn unread_documents_stay_in_memory() {
    let storage = Arc::new(MemoryStorageService::new());
    let services = tight_services(storage.clone());
    let workspace = Workspace::new(services.clone());
    let project = ProjectId::new_unique();
    let document = DocumentId::new_unique(project);

    let solution = workspace
        .update(|solution| {
            solution.add_project(ProjectInfo::new(project, "p", OUTLINE_LANGUAGE).document(
                DocumentInfo::with_text(document, "big.outline", large_body()),
            ))
        })
        .unwrap();

    workspace.enforce_memory();
    services.retention().spill_queue.flush();
    let doc = solution.document(document).unwrap();
    assert_eq!(doc.retained_text().state(), RetentionState::Live);
    assert_eq!(storage.stats().writes, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn spilled_text_reparses_after_recovery() {
    let storage = Arc::new(MemoryStorageService::new());
    let services = tight_services(storage.clone());
    let workspace = Workspace::new(services.clone());
    let project = ProjectId::new_unique();
    let document = DocumentId::new_unique(project);

    let solution = workspace
        .update(|solution| {
            solution.add_project(ProjectInfo::new(project, "p", OUTLINE_LANGUAGE).document(
                DocumentInfo::with_text(document, "big.outline", large_body()),
            ))
        })
        .unwrap();
    let cancel = CancellationToken::new();
    let doc = solution.document(document).unwrap().clone();
    doc.text_and_version_async(&cancel).await.unwrap();

    workspace.enforce_memory();
    services.retention().spill_queue.flush();

    let edited = solution
        .with_document_text(document, format!("{} fn g;", large_body()))
        .unwrap();
    let version = edited
        .project(project)
        .unwrap()
        .latest_top_level_version_async(&cancel)
        .await
        .unwrap();
    let text_version = edited
        .document(document)
        .unwrap()
        .text_version_async(&cancel)
        .await
        .unwrap();
    assert_eq!(version, text_version);
}
