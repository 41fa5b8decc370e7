use serde::{Deserialize, Serialize};

/// Coarse categories of the workspace model's memory budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// Document texts held in memory (spillable to temporary storage).
    SourceText,
    SyntaxTrees,
    /// Per-project artifacts cached by version (compiled output, indexes).
    DerivedArtifacts,
    Other,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 4] = [
        MemoryCategory::SourceText,
        MemoryCategory::SyntaxTrees,
        MemoryCategory::DerivedArtifacts,
        MemoryCategory::Other,
    ];
}

/// Per-category memory breakdown in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    pub source_text: u64,
    pub syntax_trees: u64,
    pub derived_artifacts: u64,
    pub other: u64,
}

impl MemoryBreakdown {
    pub fn total(self) -> u64 {
        self.source_text
            .saturating_add(self.syntax_trees)
            .saturating_add(self.derived_artifacts)
            .saturating_add(self.other)
    }

    pub fn get(self, category: MemoryCategory) -> u64 {
        match category {
            MemoryCategory::SourceText => self.source_text,
            MemoryCategory::SyntaxTrees => self.syntax_trees,
            MemoryCategory::DerivedArtifacts => self.derived_artifacts,
            MemoryCategory::Other => self.other,
        }
    }

    pub fn set(&mut self, category: MemoryCategory, bytes: u64) {
        let slot = match category {
            MemoryCategory::SourceText => &mut self.source_text,
            MemoryCategory::SyntaxTrees => &mut self.syntax_trees,
            MemoryCategory::DerivedArtifacts => &mut self.derived_artifacts,
            MemoryCategory::Other => &mut self.other,
        };
        *slot = bytes;
    }

    pub fn add(&mut self, category: MemoryCategory, bytes: u64) {
        let current = self.get(category);
        self.set(category, current.saturating_add(bytes));
    }

    /// Scales every category by `ratio`, rounding to the nearest byte.
    pub fn scaled(self, ratio: f64) -> Self {
        let mut out = Self::default();
        for category in MemoryCategory::ALL {
            out.set(category, ((self.get(category) as f64) * ratio).round() as u64);
        }
        out
    }

    /// `true` when no category of `self` exceeds the same category of `limit`.
    pub fn within(self, limit: MemoryBreakdown) -> bool {
        MemoryCategory::ALL
            .iter()
            .all(|&category| self.get(category) <= limit.get(category))
    }
}
