use serde::{Deserialize, Serialize};

/// Coarse-grained memory pressure levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryPressure {
    /// Fraction of each category budget evictors are asked to shrink to.
    pub fn eviction_target_ratio(self) -> f64 {
        match self {
            MemoryPressure::Low => 1.0,
            MemoryPressure::Medium => 0.70,
            MemoryPressure::High => 0.50,
            MemoryPressure::Critical => 0.0,
        }
    }
}

/// Usage-to-budget ratios at which each [`MemoryPressure`] level starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryPressureThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for MemoryPressureThresholds {
    fn default() -> Self {
        Self {
            medium: 0.70,
            high: 0.85,
            critical: 0.95,
        }
    }
}

impl MemoryPressureThresholds {
    pub fn level_for_ratio(self, ratio: f64) -> MemoryPressure {
        if ratio >= self.critical {
            MemoryPressure::Critical
        } else if ratio >= self.high {
            MemoryPressure::High
        } else if ratio >= self.medium {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }

    pub fn level_for_usage(self, usage_bytes: u64, budget_bytes: u64) -> MemoryPressure {
        let ratio = (usage_bytes as f64) / (budget_bytes.max(1) as f64);
        self.level_for_ratio(ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_thresholds() {
        let thresholds = MemoryPressureThresholds::default();
        assert_eq!(thresholds.level_for_usage(0, 100), MemoryPressure::Low);
        assert_eq!(thresholds.level_for_usage(70, 100), MemoryPressure::Medium);
        assert_eq!(thresholds.level_for_usage(85, 100), MemoryPressure::High);
        assert_eq!(thresholds.level_for_usage(99, 100), MemoryPressure::Critical);
        assert_eq!(thresholds.level_for_usage(1, 0), MemoryPressure::Critical);
    }
}
