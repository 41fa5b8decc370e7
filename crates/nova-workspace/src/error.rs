use nova_cache::LazyError;
use nova_core::{DocumentId, EditError, ProjectId};
use nova_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),
    #[error("project {0} already exists")]
    DuplicateProject(ProjectId),
    #[error("document {0} already exists")]
    DuplicateDocument(DocumentId),
    #[error("document {document} does not belong to project {project}")]
    DocumentProjectMismatch {
        document: DocumentId,
        project: ProjectId,
    },
    #[error("project {from} references unknown project {to}")]
    ProjectReferenceNotFound { from: ProjectId, to: ProjectId },
    #[error("project {from} already references project {to}")]
    DuplicateProjectReference { from: ProjectId, to: ProjectId },
    #[error("document order for project {0} is not a permutation of its documents")]
    InvalidDocumentOrder(ProjectId),
    #[error("no parser registered for language `{0}`")]
    UnsupportedLanguage(String),
    #[error("solution is stale: forked from workspace version {found}, current is {current}")]
    StaleSolution { current: u64, found: u64 },
    #[error("invalid text edit: {0}")]
    Edit(#[from] EditError),
    #[error(transparent)]
    Lazy(#[from] LazyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WorkspaceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkspaceError::Lazy(err) if err.is_cancelled())
    }
}
