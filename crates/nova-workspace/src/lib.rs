//! Immutable solution, project and document snapshots.
//!
//! Every mutation returns a new snapshot that shares all untouched state
//! with its predecessor. Expensive facts are computed lazily and at most once
//! per snapshot:
//!
//! - document text, retained through memory pressure via `nova-cache`;
//! - syntax trees, reparsed incrementally from the previous tree;
//! - per-project aggregate versions (latest text, latest top-level change);
//! - the project dependency graph, derived from the previous solution's graph.
//!
//! [`Workspace`] owns the current [`SolutionState`] and adopts forks of it.

mod artifacts;
mod document;
mod error;
mod graph;
mod info;
mod loader;
mod project;
mod services;
mod solution;
mod workspace;

pub use artifacts::ProjectArtifactCache;
pub use document::{
    document_id_for_tree, DocumentAttributes, DocumentState, TextSource, TreeAndVersion,
};
pub use error::WorkspaceError;
pub use graph::ProjectDependencyGraph;
pub use info::{AnalyzerReference, CompilationOptions, DocumentInfo, MetadataReference, ProjectInfo};
pub use loader::{ConstantTextLoader, FileTextLoader, TextLoader};
pub use project::{ProjectAttributes, ProjectState};
pub use services::WorkspaceServices;
pub use solution::SolutionState;
pub use workspace::{Workspace, WorkspaceChange, WorkspaceEvent};

pub use nova_cache::{CancellationToken, LazyError};
pub use nova_core::{
    DocumentId, ProjectId, SolutionId, TextAndVersion, TextEdit, TextRange, TextSize, VersionStamp,
};
