//! Read-only catalog of calibrated items.
//!
//! Items are loaded once from a JSON array and never mutated. Fine-grained
//! topic names in the source data are folded onto the four broad
//! [`SkillCategory`] values used for content balancing.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ItemBankError;

/// Broad content area used to balance coverage during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkillCategory {
    NumberOperations,
    Algebra,
    Geometry,
    Advanced,
}

impl SkillCategory {
    /// All categories, in a fixed order.
    pub const ALL: [SkillCategory; 4] = [
        SkillCategory::NumberOperations,
        SkillCategory::Algebra,
        SkillCategory::Geometry,
        SkillCategory::Advanced,
    ];

    /// Map a fine-grained topic (e.g. `"pythagorean-theorem"`) to its broad category.
    ///
    /// Broad category names map to themselves. Unknown topics fall into
    /// number-operations.
    pub fn from_topic(topic: &str) -> Self {
        match topic.trim().to_lowercase().as_str() {
            "algebra" | "integers-rationals" | "scientific-notation" | "ratios-proportions"
            | "percent" | "expressions" | "equations" | "linear-equations"
            | "linear-functions" | "systems" | "inequalities" | "polynomials" | "factoring"
            | "quadratics" | "radicals" | "rational-expressions" | "complex-numbers"
            | "exponentials-logarithms" | "exponential" | "sequences-series" | "sequences"
            | "conics" | "functions" | "graphing" | "coordinate-plane"
            | "expressions-equations" | "rational" | "rates" | "conversions"
            | "word-problems" | "number-theory" | "counting" => SkillCategory::Algebra,

            "geometry" | "shapes-geometry" | "measurement" | "area-perimeter" | "volume"
            | "surface-area" | "angles" | "pythagorean-theorem" | "transformations"
            | "congruence" | "similarity" | "proofs" | "circles" | "triangles"
            | "parallel-perpendicular" | "right-triangles" | "coordinate-geometry"
            | "scatter-plots" => SkillCategory::Geometry,

            "advanced" | "trigonometry" | "identities" | "polar-coordinates" | "vectors"
            | "matrices" | "limits" | "derivatives" | "integration" | "integrals"
            | "series-tests" | "taylor-series" | "parametric-polar"
            | "differential-equations" | "multivariable" | "vector-calculus" | "statistics"
            | "probability" => SkillCategory::Advanced,

            _ => SkillCategory::NumberOperations,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SkillCategory::NumberOperations => "number-operations",
            SkillCategory::Algebra => "algebra",
            SkillCategory::Geometry => "geometry",
            SkillCategory::Advanced => "advanced",
        }
    }
}

impl fmt::Display for SkillCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A calibrated item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: String,
    pub skill_id: String,
    pub skill_category: SkillCategory,
    /// 2PL difficulty (b).
    pub difficulty: f64,
    /// 2PL discrimination (a).
    pub discrimination: f64,
    #[serde(rename = "type")]
    pub item_type: String,
    pub content: String,
    pub correct_answer: String,
}

/// Item as stored in the bank file, before category folding and validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub skill_id: String,
    pub skill_category: String,
    pub difficulty: f64,
    #[serde(default = "default_discrimination")]
    pub discrimination: f64,
    #[serde(rename = "type", default = "default_item_type")]
    pub item_type: String,
    #[serde(default)]
    pub content: String,
    pub correct_answer: String,
}

fn default_discrimination() -> f64 {
    1.0
}

fn default_item_type() -> String {
    "short-answer".to_string()
}

impl TryFrom<ItemRecord> for Item {
    type Error = ItemBankError;

    fn try_from(record: ItemRecord) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| ItemBankError::InvalidItem {
            item_id: record.id.clone(),
            reason: reason.to_string(),
        };

        if record.id.trim().is_empty() {
            return Err(invalid("id cannot be empty"));
        }
        if record.skill_id.trim().is_empty() {
            return Err(invalid("skill_id cannot be empty"));
        }
        if !record.difficulty.is_finite() {
            return Err(invalid("difficulty must be finite"));
        }
        if !record.discrimination.is_finite() || record.discrimination <= 0.0 {
            return Err(invalid("discrimination must be positive"));
        }

        Ok(Item {
            skill_category: SkillCategory::from_topic(&record.skill_category),
            id: record.id,
            skill_id: record.skill_id,
            difficulty: record.difficulty,
            discrimination: record.discrimination,
            item_type: record.item_type,
            content: record.content,
            correct_answer: record.correct_answer,
        })
    }
}

impl Item {
    /// Create an item with default type, empty content and answer.
    pub fn new(
        id: impl Into<String>,
        skill_id: impl Into<String>,
        skill_category: SkillCategory,
        difficulty: f64,
        discrimination: f64,
    ) -> Self {
        Self {
            id: id.into(),
            skill_id: skill_id.into(),
            skill_category,
            difficulty,
            discrimination,
            item_type: default_item_type(),
            content: String::new(),
            correct_answer: String::new(),
        }
    }

    /// Set the prompt text.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Set the expected answer.
    pub fn with_correct_answer(mut self, answer: impl Into<String>) -> Self {
        self.correct_answer = answer.into();
        self
    }

    /// Check a learner's answer.
    ///
    /// Comparison is whitespace- and case-insensitive; when both sides parse
    /// as numbers they are compared numerically (`"0.50"` matches `".5"`).
    pub fn is_correct(&self, answer: &str) -> bool {
        let given = answer.trim();
        let expected = self.correct_answer.trim();

        match (f64::from_str(given), f64::from_str(expected)) {
            (Ok(g), Ok(e)) => (g - e).abs() < 1e-9,
            _ => given.eq_ignore_ascii_case(expected),
        }
    }

    /// The learner-facing view, without the answer key.
    pub fn view(&self) -> ItemView {
        ItemView {
            id: self.id.clone(),
            skill_id: self.skill_id.clone(),
            skill_category: self.skill_category,
            difficulty: self.difficulty,
            item_type: self.item_type.clone(),
            content: self.content.clone(),
        }
    }
}

/// An item as served to the learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
    pub id: String,
    pub skill_id: String,
    pub skill_category: SkillCategory,
    pub difficulty: f64,
    #[serde(rename = "type")]
    pub item_type: String,
    pub content: String,
}

/// Read-only item catalog.
pub trait ItemBank: Send + Sync {
    /// All items, in a stable order.
    fn items(&self) -> &[Item];

    /// Look up an item by id.
    fn get(&self, id: &str) -> Option<&Item>;

    /// Number of items in the bank.
    fn len(&self) -> usize {
        self.items().len()
    }

    /// Whether the bank is empty.
    fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

/// Item bank held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryItemBank {
    items: Vec<Item>,
    index: HashMap<String, usize>,
}

impl InMemoryItemBank {
    /// Build a bank from validated items. Ids must be unique.
    pub fn from_items(items: Vec<Item>) -> Result<Self, ItemBankError> {
        let mut index = HashMap::with_capacity(items.len());
        for (pos, item) in items.iter().enumerate() {
            if index.insert(item.id.clone(), pos).is_some() {
                return Err(ItemBankError::DuplicateItem {
                    item_id: item.id.clone(),
                });
            }
        }
        Ok(Self { items, index })
    }

    /// Parse a JSON array of item records.
    pub fn from_json_str(json: &str) -> Result<Self, ItemBankError> {
        let records: Vec<ItemRecord> = serde_json::from_str(json)?;
        let items = records
            .into_iter()
            .map(Item::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_items(items)
    }

    /// Load a JSON item bank from disk.
    pub fn from_json_file(path: &Path) -> Result<Self, ItemBankError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ItemBankError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let bank = Self::from_json_str(&raw)?;
        info!(path = %path.display(), items = bank.len(), "Item bank loaded");
        Ok(bank)
    }
}

impl ItemBank for InMemoryItemBank {
    fn items(&self) -> &[Item] {
        &self.items
    }

    fn get(&self, id: &str) -> Option<&Item> {
        self.index.get(id).and_then(|&pos| self.items.get(pos))
    }
}
