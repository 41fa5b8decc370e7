use crate::pressure::MemoryPressure;
use crate::types::MemoryCategory;

/// Asks a component to shrink its tracked usage to `target_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionRequest {
    pub pressure: MemoryPressure,
    pub target_bytes: u64,
}

/// What a component reports back after an [`EvictionRequest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionResult {
    pub before_bytes: u64,
    pub after_bytes: u64,
}

impl EvictionResult {
    pub fn freed_bytes(self) -> u64 {
        self.before_bytes.saturating_sub(self.after_bytes)
    }
}

/// A component that can give memory back on request.
///
/// Eviction must never block on I/O: components that persist data before
/// dropping it hand the write to a background queue and update their tracked
/// usage once the in-memory copy is actually gone.
pub trait MemoryEvictor: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> MemoryCategory;

    fn evict(&self, request: EvictionRequest) -> EvictionResult;

    /// Persist cold state ahead of eviction. Called under high pressure.
    fn flush_to_disk(&self) -> std::io::Result<()> {
        Ok(())
    }
}
