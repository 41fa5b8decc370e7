use std::sync::{Arc, OnceLock};

use crate::error::StorageError;
use crate::{StorageCounters, StorageStats, TemporaryStorage, TemporaryStorageService};

/// Keeps "spilled" texts in process memory.
///
/// Used when no spill directory is configured, and in tests. Spilling to it
/// still releases the strong text held by the retention cache, so the
/// eviction protocol behaves the same as with file storage.
#[derive(Debug, Default)]
pub struct MemoryStorageService {
    counters: Arc<StorageCounters>,
}

impl MemoryStorageService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemporaryStorageService for MemoryStorageService {
    fn create_storage(&self) -> Result<Arc<dyn TemporaryStorage>, StorageError> {
        Ok(Arc::new(MemoryStorage {
            bytes: OnceLock::new(),
            counters: self.counters.clone(),
        }))
    }

    fn stats(&self) -> StorageStats {
        self.counters.snapshot()
    }
}

#[derive(Debug)]
struct MemoryStorage {
    bytes: OnceLock<Box<[u8]>>,
    counters: Arc<StorageCounters>,
}

impl TemporaryStorage for MemoryStorage {
    fn write_text(&self, text: &str) -> Result<(), StorageError> {
        self.bytes
            .set(text.as_bytes().into())
            .map_err(|_| StorageError::AlreadyWritten)?;
        self.counters.record_write();
        Ok(())
    }

    fn read_text(&self) -> Result<String, StorageError> {
        let bytes = self.bytes.get().ok_or(StorageError::NotWritten)?;
        self.counters.record_read();
        String::from_utf8(bytes.to_vec()).map_err(|_| StorageError::InvalidUtf8)
    }

    fn is_written(&self) -> bool {
        self.bytes.get().is_some()
    }
}
