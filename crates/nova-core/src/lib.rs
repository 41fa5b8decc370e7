//! Core shared types for the Nova workspace model.
//!
//! This crate is intentionally small: it holds the logical clock
//! ([`VersionStamp`]), the stable ids of the snapshot graph, and the text
//! primitives (edits, change ranges) every other crate speaks.

mod edit;
mod id;
mod text;
mod version;

pub use edit::{apply_text_edits, normalize_text_edits, EditError, TextEdit};
pub use id::{DocumentId, ProjectId, SolutionId};
pub use text::{TextAndVersion, TextChangeRange, TextRange, TextSize};
pub use version::VersionStamp;
