use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::estimator::Observation;
use crate::item_bank::SkillCategory;

/// One answered screener item, with the estimate as it stood after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResponse {
    pub problem_id: String,
    pub skill_id: String,
    pub skill_category: SkillCategory,
    pub difficulty: f64,
    pub discrimination: f64,
    pub correct: bool,
    pub response_time_ms: u64,
    /// Theta before this response was incorporated.
    pub theta_before: f64,
    pub theta_at_time: f64,
    #[serde(with = "super::unbounded")]
    pub se_at_time: f64,
    /// Item information at `theta_before`.
    pub information_gained: f64,
    /// 1-based position in the history.
    pub question_number: usize,
    pub answered_at: DateTime<Utc>,
}

impl ItemResponse {
    /// The parts of this response the estimator needs.
    pub fn observation(&self) -> Observation {
        Observation {
            difficulty: self.difficulty,
            discrimination: self.discrimination,
            correct: self.correct,
        }
    }
}
