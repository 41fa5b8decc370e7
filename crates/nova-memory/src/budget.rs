use crate::types::{MemoryBreakdown, MemoryCategory};
use serde::{Deserialize, Serialize};

pub const MB: u64 = 1024 * 1024;
pub const GB: u64 = 1024 * MB;

const MIN_DEFAULT_BUDGET: u64 = 512 * MB;
const MAX_DEFAULT_BUDGET: u64 = 8 * GB;

/// Total memory budget plus its per-category split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBudget {
    pub total: u64,
    pub categories: MemoryBreakdown,
}

impl MemoryBudget {
    /// Splits `total` across categories: 40% source text, 30% syntax trees,
    /// 20% derived artifacts, the remainder to `Other`.
    pub fn from_total(total: u64) -> Self {
        let share = |percent: u64| ((total as u128) * (percent as u128) / 100) as u64;
        let source_text = share(40);
        let syntax_trees = share(30);
        let derived_artifacts = share(20);
        let other = total
            .saturating_sub(source_text)
            .saturating_sub(syntax_trees)
            .saturating_sub(derived_artifacts);

        Self {
            total,
            categories: MemoryBreakdown {
                source_text,
                syntax_trees,
                derived_artifacts,
                other,
            },
        }
    }

    /// A quarter of physical memory, clamped to a sane range.
    pub fn default_for_system() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let total_ram = system.total_memory();

        let total = if total_ram == 0 {
            tracing::debug!(
                target = "nova.memory",
                "system memory size unavailable; using minimum default budget"
            );
            MIN_DEFAULT_BUDGET
        } else {
            (total_ram / 4).clamp(MIN_DEFAULT_BUDGET, MAX_DEFAULT_BUDGET)
        };
        Self::from_total(total)
    }

    pub fn apply_overrides(self, overrides: MemoryBudgetOverrides) -> Self {
        let mut budget = match overrides.total {
            Some(total) => Self::from_total(total),
            None => self,
        };

        for (category, value) in [
            (MemoryCategory::SourceText, overrides.source_text),
            (MemoryCategory::SyntaxTrees, overrides.syntax_trees),
            (MemoryCategory::DerivedArtifacts, overrides.derived_artifacts),
            (MemoryCategory::Other, overrides.other),
        ] {
            if let Some(bytes) = value {
                budget.categories.set(category, bytes);
            }
        }

        // An explicit total wins; otherwise the total follows the categories.
        if overrides.total.is_none() {
            budget.total = budget.categories.total();
        }
        budget
    }
}

/// Optional user overrides for [`MemoryBudget`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryBudgetOverrides {
    pub total: Option<u64>,
    pub source_text: Option<u64>,
    pub syntax_trees: Option<u64>,
    pub derived_artifacts: Option<u64>,
    pub other: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_adds_up_to_total() {
        for total in [0, 1, 7, 1_000, 3 * GB + 17] {
            let budget = MemoryBudget::from_total(total);
            assert_eq!(budget.categories.total(), total);
        }

        let budget = MemoryBudget::from_total(1_000);
        assert_eq!(budget.categories.source_text, 400);
        assert_eq!(budget.categories.syntax_trees, 300);
        assert_eq!(budget.categories.derived_artifacts, 200);
        assert_eq!(budget.categories.other, 100);
    }

    #[test]
    fn overrides_replace_individual_categories() {
        let budget = MemoryBudget::from_total(1_000).apply_overrides(MemoryBudgetOverrides {
            source_text: Some(10),
            ..MemoryBudgetOverrides::default()
        });
        assert_eq!(budget.categories.source_text, 10);
        assert_eq!(budget.total, 610);
    }

    #[test]
    fn system_default_is_clamped() {
        let budget = MemoryBudget::default_for_system();
        assert!(budget.total >= MIN_DEFAULT_BUDGET);
        assert!(budget.total <= MAX_DEFAULT_BUDGET);
    }
}
