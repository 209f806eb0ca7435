use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::interview::InterviewQuestion;
use crate::cat::{
    confidence, unbounded, AbilityEstimate, Frontier, InterviewCandidate, ItemResponse,
    Observation, Prior, ScreenerState, SkillCoverage,
};
use crate::config::ConvergenceThresholds;
use crate::error::AssessmentError;
use crate::item_bank::Item;

/// Kind of assessment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionType {
    /// Full placement screener for a new learner.
    StartingPoint,
    /// Short re-check against a previously estimated ability.
    GrowthCheck,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::StartingPoint => write!(f, "starting-point"),
            SessionType::GrowthCheck => write!(f, "growth-check"),
        }
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "starting-point" => Ok(SessionType::StartingPoint),
            "growth-check" => Ok(SessionType::GrowthCheck),
            _ => Err(format!("Unknown session type: {}", s)),
        }
    }
}

/// Session phase. Declaration order is the only allowed direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Screener,
    Interview,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Screener => write!(f, "screener"),
            Phase::Interview => write!(f, "interview"),
            Phase::Complete => write!(f, "complete"),
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "screener" => Ok(Phase::Screener),
            "interview" => Ok(Phase::Interview),
            "complete" => Ok(Phase::Complete),
            _ => Err(format!("Unknown phase: {}", s)),
        }
    }
}

/// One assessment attempt, persisted between turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSession {
    pub id: String,
    pub learner_id: String,
    pub session_type: SessionType,
    pub phase: Phase,

    pub theta: f64,
    #[serde(with = "unbounded")]
    pub standard_error: f64,
    /// 0-100, derived from `standard_error`.
    pub confidence: f64,
    pub cumulative_information: f64,
    pub low_confidence: bool,

    pub prior: Prior,
    /// Ability from the learner's last assessment, for growth checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_theta: Option<f64>,
    /// Skills the learner has already worked on; growth checks serve these first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub covered_skills: Vec<String>,

    pub responses: Vec<ItemResponse>,
    pub thresholds: ConvergenceThresholds,
    pub coverage: SkillCoverage,
    pub screener_state: ScreenerState,
    pub pending_item_id: Option<String>,

    pub frontier: Option<Frontier>,
    pub interview_skills: Vec<InterviewCandidate>,
    pub interview_questions: Vec<InterviewQuestion>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub screener_completed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl AssessmentSession {
    /// Create a fresh session in the screener phase.
    pub fn new(
        learner_id: impl Into<String>,
        session_type: SessionType,
        prior: Prior,
        thresholds: ConvergenceThresholds,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            learner_id: learner_id.into(),
            session_type,
            phase: Phase::Screener,
            theta: prior.mean,
            standard_error: f64::INFINITY,
            confidence: 0.0,
            cumulative_information: 0.0,
            low_confidence: false,
            prior,
            previous_theta: None,
            covered_skills: Vec::new(),
            responses: Vec::new(),
            thresholds,
            coverage: SkillCoverage::new(),
            screener_state: ScreenerState::Active,
            pending_item_id: None,
            frontier: None,
            interview_skills: Vec::new(),
            interview_questions: Vec::new(),
            created_at: now,
            updated_at: now,
            screener_completed_at: None,
            completed_at: None,
            expires_at: now + ttl,
        }
    }

    /// Record the learner's prior ability for a growth check.
    pub fn with_previous_theta(mut self, theta: f64) -> Self {
        self.previous_theta = Some(theta);
        self
    }

    /// Record the skills a growth check should revisit. Blank and repeated
    /// entries are dropped.
    pub fn with_covered_skills(mut self, skills: impl IntoIterator<Item = String>) -> Self {
        let mut seen = HashSet::new();
        self.covered_skills = skills
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        self
    }

    pub fn covered_skill_ids(&self) -> HashSet<&str> {
        self.covered_skills.iter().map(String::as_str).collect()
    }

    /// Number of answered screener items. Always the history length.
    pub fn question_count(&self) -> usize {
        self.responses.len()
    }

    pub fn has_answered(&self, item_id: &str) -> bool {
        self.responses.iter().any(|r| r.problem_id == item_id)
    }

    pub fn asked_ids(&self) -> HashSet<&str> {
        self.responses.iter().map(|r| r.problem_id.as_str()).collect()
    }

    pub fn tested_skills(&self) -> BTreeSet<String> {
        self.coverage.tested_skills()
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.responses.iter().map(ItemResponse::observation).collect()
    }

    pub fn information_gains(&self) -> Vec<f64> {
        self.responses.iter().map(|r| r.information_gained).collect()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Append a response and adopt the new estimate.
    ///
    /// `estimate` must already include this response; `information_gained`
    /// is the item's information at the theta it was served at.
    pub fn record_response(
        &mut self,
        item: &Item,
        correct: bool,
        response_time_ms: u64,
        estimate: &AbilityEstimate,
        information_gained: f64,
        se_max: f64,
    ) {
        let question_number = self.question_count() + 1;
        let now = Utc::now();

        self.responses.push(ItemResponse {
            problem_id: item.id.clone(),
            skill_id: item.skill_id.clone(),
            skill_category: item.skill_category,
            difficulty: item.difficulty,
            discrimination: item.discrimination,
            correct,
            response_time_ms,
            theta_before: self.theta,
            theta_at_time: estimate.theta,
            se_at_time: estimate.standard_error,
            information_gained,
            question_number,
            answered_at: now,
        });

        self.coverage = self
            .coverage
            .record(item.skill_category, &item.skill_id, question_number);
        self.theta = estimate.theta;
        self.standard_error = estimate.standard_error;
        self.cumulative_information = estimate.cumulative_information;
        self.confidence = confidence(estimate.standard_error, se_max);
        self.low_confidence = estimate.clamped;
        self.pending_item_id = None;
        self.updated_at = now;
    }

    /// Move to a later phase.
    ///
    /// Backward moves are rejected, and `Complete` requires every interview
    /// question to have a response.
    pub fn advance_phase(&mut self, to: Phase) -> Result<(), AssessmentError> {
        if to < self.phase {
            return Err(AssessmentError::PhaseRegression {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        if to == self.phase {
            return Ok(());
        }

        let now = Utc::now();
        match to {
            Phase::Screener => {}
            Phase::Interview => {
                self.screener_completed_at = Some(now);
            }
            Phase::Complete => {
                let unanswered = self.unanswered_questions();
                if unanswered > 0 {
                    return Err(AssessmentError::InterviewIncomplete {
                        session_id: self.id.clone(),
                        unanswered,
                    });
                }
                self.screener_completed_at.get_or_insert(now);
                self.completed_at = Some(now);
            }
        }

        self.phase = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn unanswered_questions(&self) -> usize {
        self.interview_questions
            .iter()
            .filter(|q| q.response.is_none())
            .count()
    }

    /// First question still waiting for a learner response.
    pub fn next_interview_question(&self) -> Option<&InterviewQuestion> {
        self.interview_questions.iter().find(|q| q.response.is_none())
    }

    pub fn question(&self, question_id: &str) -> Option<&InterviewQuestion> {
        self.interview_questions
            .iter()
            .find(|q| q.question_id == question_id)
    }

    pub fn question_mut(&mut self, question_id: &str) -> Option<&mut InterviewQuestion> {
        self.interview_questions
            .iter_mut()
            .find(|q| q.question_id == question_id)
    }

    /// Questions answered but not yet graded.
    pub fn pending_evaluations(&self) -> usize {
        self.interview_questions
            .iter()
            .filter(|q| q.response.is_some() && q.evaluation.is_none())
            .count()
    }
}
