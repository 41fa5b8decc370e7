//! Temporary storage for text spilled out of memory.
//!
//! The workspace model drops the in-memory copy of a document text under
//! memory pressure and reads it back on demand. This crate provides the
//! storage side of that protocol:
//!
//! - [`TemporaryStorageService`] hands out fresh storage handles.
//! - [`TemporaryStorage`] is a **write-once** slot: the first
//!   [`TemporaryStorage::write_text`] wins, later writes fail with
//!   [`StorageError::AlreadyWritten`]. Texts are immutable, so a slot never
//!   needs rewriting.
//!
//! ## File format
//! [`FileStorageService`] writes one file per handle: a 32-byte header (see
//! [`TextHeader`]) followed by the payload, optionally zstd-compressed. Files
//! are written to a temp name and renamed into place, read back through a
//! memory map, and verified against a blake3 content hash.

mod error;
mod file;
mod header;
mod memory;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use error::StorageError;
pub use file::{FileStorage, FileStorageService};
pub use header::{Compression, TextHeader, HEADER_LEN};
pub use memory::MemoryStorageService;

/// Creates storage handles for spilled texts.
pub trait TemporaryStorageService: Send + Sync + fmt::Debug {
    fn create_storage(&self) -> Result<Arc<dyn TemporaryStorage>, StorageError>;

    /// Reads and writes performed through handles of this service.
    fn stats(&self) -> StorageStats;
}

/// A write-once storage slot for one text.
pub trait TemporaryStorage: Send + Sync + fmt::Debug {
    fn write_text(&self, text: &str) -> Result<(), StorageError>;

    fn read_text(&self) -> Result<String, StorageError>;

    fn is_written(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub writes: u64,
    pub reads: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StorageCounters {
    writes: AtomicU64,
    reads: AtomicU64,
}

impl StorageCounters {
    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StorageStats {
        StorageStats {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
        }
    }
}
