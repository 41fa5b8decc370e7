use std::sync::Arc;

use nova_syntax::OUTLINE_LANGUAGE;
use nova_workspace::{
    CancellationToken, DocumentId, DocumentInfo, FileTextLoader, ProjectId, ProjectInfo,
    SolutionState, TextLoader, WorkspaceError, WorkspaceServices,
};
use pretty_assertions::assert_eq;

fn loader(path: &std::path::Path) -> Arc<dyn TextLoader> {
    Arc::new(FileTextLoader::new(path))
}

#[test]
fn documents_are_indexed_by_file_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.outline");
    std::fs::write(&path, "module Shared { fn f; }").unwrap();

    let first = ProjectId::new_unique();
    let second = ProjectId::new_unique();
    let a = DocumentId::new_unique(first);
    let b = DocumentId::new_unique(second);

    let solution = SolutionState::new(WorkspaceServices::default())
        .add_project(ProjectInfo::new(first, "first", OUTLINE_LANGUAGE).document(
            DocumentInfo::with_loader(a, "shared.outline", loader(&path)).file_path(&path),
        ))
        .unwrap()
        .add_project(ProjectInfo::new(second, "second", OUTLINE_LANGUAGE).document(
            DocumentInfo::with_loader(b, "shared.outline", loader(&path)).file_path(&path),
        ))
        .unwrap();
    assert_eq!(solution.document_ids_with_file_path(&path), vec![a, b]);

    let moved = solution
        .with_document_file_path(b, Some(dir.path().join("moved.outline")))
        .unwrap();
    assert_eq!(moved.document_ids_with_file_path(&path), vec![a]);
    assert_eq!(
        moved.document_ids_with_file_path(&dir.path().join("moved.outline")),
        vec![b]
    );

    let removed = moved.remove_document(a).unwrap();
    assert!(removed.document_ids_with_file_path(&path).is_empty());
    assert!(matches!(
        removed.remove_document(a),
        Err(WorkspaceError::DocumentNotFound(id)) if id == a
    ));
}

#[test]
fn loader_backed_documents_read_the_file_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lazy.outline");
    std::fs::write(&path, "fn before;").unwrap();

    let project = ProjectId::new_unique();
    let document = DocumentId::new_unique(project);
    let solution = SolutionState::new(WorkspaceServices::default())
        .add_project(ProjectInfo::new(project, "p", OUTLINE_LANGUAGE).document(
            DocumentInfo::with_loader(document, "lazy.outline", loader(&path)).file_path(&path),
        ))
        .unwrap();
    let doc = solution.document(document).unwrap();
    assert_eq!(doc.try_text_version(), None);

    let cancel = CancellationToken::new();
    let text = doc.text_and_version(&cancel).unwrap();
    assert_eq!(text.text.as_str(), "fn before;");
    assert_eq!(doc.try_text_version(), Some(text.version));

    // The loaded text is retained; later disk changes need a new loader.
    std::fs::write(&path, "fn after;").unwrap();
    assert_eq!(doc.text_and_version(&cancel).unwrap().text.as_str(), "fn before;");

    let reloaded = solution
        .with_document_text_loader(document, loader(&path))
        .unwrap();
    let doc = reloaded.document(document).unwrap();
    assert_eq!(doc.text_and_version(&cancel).unwrap().text.as_str(), "fn after;");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_files_fail_without_poisoning_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("later.outline");

    let project = ProjectId::new_unique();
    let document = DocumentId::new_unique(project);
    let solution = SolutionState::new(WorkspaceServices::default())
        .add_project(ProjectInfo::new(project, "p", OUTLINE_LANGUAGE).document(
            DocumentInfo::with_loader(document, "later.outline", loader(&path)),
        ))
        .unwrap();
    let doc = solution.document(document).unwrap();
    let cancel = CancellationToken::new();

    let err = doc.syntax_tree_async(&cancel).await.unwrap_err();
    assert!(!err.is_cancelled());

    tokio::fs::write(&path, "class Later {}").await.unwrap();
    let tree = doc.syntax_tree_async(&cancel).await.unwrap();
    assert_eq!(tree.text().as_str(), "class Later {}");
}
