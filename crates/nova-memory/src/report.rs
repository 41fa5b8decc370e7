use crate::budget::MemoryBudget;
use crate::pressure::MemoryPressure;
use crate::types::{MemoryBreakdown, MemoryCategory};
use serde::{Deserialize, Serialize};

/// Snapshot of memory state, suitable for logging or telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReport {
    pub budget: MemoryBudget,
    pub usage: MemoryBreakdown,
    /// Resident set size, when sampling is enabled and supported.
    pub rss_bytes: Option<u64>,
    pub pressure: MemoryPressure,
}

impl MemoryReport {
    pub fn usage_total_bytes(&self) -> u64 {
        self.usage.total()
    }
}

/// Usage of one registered component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentUsage {
    pub name: String,
    pub category: MemoryCategory,
    pub bytes: u64,
}
