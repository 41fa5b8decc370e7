//! Memory budgeting, accounting and eviction orchestration for the workspace
//! model.
//!
//! This crate is intentionally lightweight and "best-effort":
//! - Accounting is approximate and driven by the owning components.
//! - Eviction is cooperative via [`MemoryEvictor`] implementors.
//! - Evicting a component only drops *its* references. Values shared with
//!   live snapshots stay reachable through those snapshots; components that
//!   spill (retained source text) must be able to recover what they dropped.

mod budget;
mod eviction;
mod manager;
mod pressure;
mod process;
mod report;
mod types;

pub use budget::{MemoryBudget, MemoryBudgetOverrides, GB, MB};
pub use eviction::{EvictionRequest, EvictionResult, MemoryEvictor};
pub use manager::{
    MemoryEvent, MemoryManager, MemoryManagerOptions, MemoryRegistration, MemoryTracker,
};
pub use pressure::{MemoryPressure, MemoryPressureThresholds};
pub use report::{ComponentUsage, MemoryReport};
pub use types::{MemoryBreakdown, MemoryCategory};
