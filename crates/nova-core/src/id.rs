//! Stable identities for solutions, projects and documents.
//!
//! Ids are process-unique and allocated from atomic counters. They are `Ord`
//! so every ordered traversal of the snapshot graph (topological order,
//! document ordering fallbacks) is reproducible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_SOLUTION: AtomicU32 = AtomicU32::new(1);
static NEXT_PROJECT: AtomicU32 = AtomicU32::new(1);
static NEXT_DOCUMENT: AtomicU32 = AtomicU32::new(1);

macro_rules! raw_id {
    ($(#[$meta:meta])* $name:ident, $counter:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            pub fn new_unique() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            #[inline]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn to_raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

raw_id!(
    /// Identity of a solution lineage. Forks of a solution keep its id.
    SolutionId,
    NEXT_SOLUTION,
    "solution"
);

raw_id!(
    /// Identity of a project inside a solution.
    ProjectId,
    NEXT_PROJECT,
    "project"
);

/// Identity of a document. Documents belong to exactly one project.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    project: ProjectId,
    index: u32,
}

impl DocumentId {
    pub fn new_unique(project: ProjectId) -> Self {
        Self {
            project,
            index: NEXT_DOCUMENT.fetch_add(1, Ordering::Relaxed),
        }
    }

    #[inline]
    pub const fn from_raw(project: ProjectId, index: u32) -> Self {
        Self { project, index }
    }

    #[inline]
    pub const fn project_id(self) -> ProjectId {
        self.project
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document#{}/{}", self.project.to_raw(), self.index)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
