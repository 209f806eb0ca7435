use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::item_bank::SkillCategory;

/// Per-turn snapshot of what the screener has covered so far.
///
/// Never mutated in place: [`SkillCoverage::record`] returns the next
/// snapshot, and the session swaps it in wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCoverage {
    category_counts: BTreeMap<SkillCategory, u32>,
    /// Question number at which each category was last tested.
    last_tested: BTreeMap<SkillCategory, usize>,
    skill_counts: BTreeMap<String, u32>,
}

impl SkillCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot after one more item in `category` / `skill_id`.
    pub fn record(&self, category: SkillCategory, skill_id: &str, question_number: usize) -> Self {
        let mut next = self.clone();
        *next.category_counts.entry(category).or_insert(0) += 1;
        next.last_tested.insert(category, question_number);
        *next.skill_counts.entry(skill_id.to_string()).or_insert(0) += 1;
        next
    }

    pub fn category_count(&self, category: SkillCategory) -> u32 {
        self.category_counts.get(&category).copied().unwrap_or(0)
    }

    /// `None` if the category has never been tested.
    pub fn last_tested(&self, category: SkillCategory) -> Option<usize> {
        self.last_tested.get(&category).copied()
    }

    pub fn skill_count(&self, skill_id: &str) -> u32 {
        self.skill_counts.get(skill_id).copied().unwrap_or(0)
    }

    /// Distinct skills tested so far.
    pub fn tested_skills(&self) -> BTreeSet<String> {
        self.skill_counts.keys().cloned().collect()
    }

    /// Counts for every category, including untested ones.
    pub fn category_counts(&self) -> BTreeMap<SkillCategory, u32> {
        SkillCategory::ALL
            .iter()
            .map(|&c| (c, self.category_count(c)))
            .collect()
    }
}
