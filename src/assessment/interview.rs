//! Interview queue construction and completion rules.
//!
//! The manager builds one question per frontier candidate, records learner
//! responses, and decides when the interview is done. It never grades: see
//! [`super::grading`].

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::grading::Evaluation;
use crate::cat::{InterviewCandidate, InterviewReason};
use crate::config::InterviewConfig;
use crate::item_bank::{Item, ItemBank, ItemView, SkillCategory};
use crate::prompts::{
    EXPLANATION_TEMPLATE, MISCONCEPTION_PROBE_TEMPLATE, NO_BASE_PROBLEM, TRANSFER_TEMPLATE,
};

/// Kind of follow-up question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    Explanation,
    Transfer,
    MisconceptionProbe,
}

impl QuestionType {
    /// Rotation order used when the preferred type is already queued.
    const ROTATION: [QuestionType; 3] = [
        QuestionType::Explanation,
        QuestionType::Transfer,
        QuestionType::MisconceptionProbe,
    ];

    /// Preferred type for a candidate's reason.
    pub fn for_reason(reason: InterviewReason) -> Self {
        match reason {
            InterviewReason::FailedNearTheta => QuestionType::MisconceptionProbe,
            InterviewReason::SlowCorrectNearTheta => QuestionType::Explanation,
        }
    }

    fn next(self) -> Self {
        let pos = Self::ROTATION.iter().position(|&t| t == self).unwrap_or(0);
        Self::ROTATION[(pos + 1) % Self::ROTATION.len()]
    }

    /// Four-band rubric for this type.
    pub fn rubric(&self) -> Rubric {
        match self {
            QuestionType::Explanation => Rubric::new(
                "Explains each step with clear reasoning",
                "Describes most steps accurately",
                "Lists steps but minimal explanation",
                "Incomplete or incorrect explanation",
            ),
            QuestionType::Transfer => Rubric::new(
                "Correctly applies concept to new context and explains connection",
                "Applies concept correctly but weak explanation",
                "Partial application or understanding",
                "Cannot transfer to new context",
            ),
            QuestionType::MisconceptionProbe => Rubric::new(
                "Identifies error and explains why it's wrong",
                "Identifies error with partial explanation",
                "Knows something is wrong but unclear why",
                "Does not recognize the error",
            ),
        }
    }

    fn template(&self) -> &'static str {
        match self {
            QuestionType::Explanation => EXPLANATION_TEMPLATE,
            QuestionType::Transfer => TRANSFER_TEMPLATE,
            QuestionType::MisconceptionProbe => MISCONCEPTION_PROBE_TEMPLATE,
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionType::Explanation => write!(f, "explanation"),
            QuestionType::Transfer => write!(f, "transfer"),
            QuestionType::MisconceptionProbe => write!(f, "misconception-probe"),
        }
    }
}

/// Grading bands handed to the grader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rubric {
    pub excellent: String,
    pub good: String,
    pub developing: String,
    pub needs_work: String,
}

impl Rubric {
    pub fn new(
        excellent: impl Into<String>,
        good: impl Into<String>,
        developing: impl Into<String>,
        needs_work: impl Into<String>,
    ) -> Self {
        Self {
            excellent: excellent.into(),
            good: good.into(),
            developing: developing.into(),
            needs_work: needs_work.into(),
        }
    }
}

/// A learner's free-text answer. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewResponse {
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

/// One queued follow-up question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewQuestion {
    pub question_id: String,
    pub question_type: QuestionType,
    pub skill_id: String,
    pub skill_category: SkillCategory,
    pub reason: InterviewReason,
    pub prompt: String,
    pub base_problem: Option<ItemView>,
    pub rubric: Rubric,
    pub response: Option<InterviewResponse>,
    pub evaluation: Option<Evaluation>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub evaluation_attempts: u32,
    pub last_evaluation_error: Option<String>,
}

impl InterviewQuestion {
    /// Answered, and either graded or out of grading attempts.
    pub fn is_settled(&self, max_attempts: u32) -> bool {
        self.response.is_some()
            && (self.evaluation.is_some() || self.evaluation_attempts >= max_attempts)
    }

    pub fn record_evaluation(&mut self, evaluation: Evaluation) {
        self.evaluation_attempts += 1;
        self.evaluation = Some(evaluation);
        self.evaluated_at = Some(Utc::now());
        self.last_evaluation_error = None;
    }

    pub fn record_evaluation_failure(&mut self, error: impl Into<String>) {
        self.evaluation_attempts += 1;
        self.last_evaluation_error = Some(error.into());
    }

    /// What the learner sees.
    pub fn view(&self) -> InterviewQuestionView {
        InterviewQuestionView {
            question_id: self.question_id.clone(),
            question_type: self.question_type,
            skill_id: self.skill_id.clone(),
            prompt: self.prompt.clone(),
            base_problem: self.base_problem.clone(),
        }
    }
}

/// Learner-facing projection of an [`InterviewQuestion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewQuestionView {
    pub question_id: String,
    pub question_type: QuestionType,
    pub skill_id: String,
    pub prompt: String,
    pub base_problem: Option<ItemView>,
}

/// Build the FIFO interview queue, one question per candidate.
///
/// Each candidate's preferred type comes from its reason; if that type is
/// already in the queue the next unused type in the rotation is taken, so a
/// three-question queue covers all three types.
pub fn build_queue(
    candidates: &[InterviewCandidate],
    theta: f64,
    bank: &dyn ItemBank,
    asked_ids: &HashSet<&str>,
) -> Vec<InterviewQuestion> {
    let mut used: BTreeSet<QuestionType> = BTreeSet::new();

    candidates
        .iter()
        .map(|candidate| {
            let question_type = pick_type(QuestionType::for_reason(candidate.reason), &used);
            used.insert(question_type);

            let base = base_problem(&candidate.skill_id, theta, bank, asked_ids);
            InterviewQuestion {
                question_id: Uuid::new_v4().to_string(),
                question_type,
                skill_id: candidate.skill_id.clone(),
                skill_category: candidate.skill_category,
                reason: candidate.reason,
                prompt: render_prompt(question_type, &candidate.skill_id, base),
                base_problem: base.map(Item::view),
                rubric: question_type.rubric(),
                response: None,
                evaluation: None,
                evaluated_at: None,
                evaluation_attempts: 0,
                last_evaluation_error: None,
            }
        })
        .collect()
}

fn pick_type(preferred: QuestionType, used: &BTreeSet<QuestionType>) -> QuestionType {
    let mut candidate = preferred;
    for _ in 0..QuestionType::ROTATION.len() {
        if !used.contains(&candidate) {
            return candidate;
        }
        candidate = candidate.next();
    }
    preferred
}

/// Item for `skill_id` closest to theta, preferring ones not yet asked.
fn base_problem<'a>(
    skill_id: &str,
    theta: f64,
    bank: &'a dyn ItemBank,
    asked_ids: &HashSet<&str>,
) -> Option<&'a Item> {
    bank.items()
        .iter()
        .filter(|item| item.skill_id == skill_id)
        .min_by(|a, b| {
            let asked_a = asked_ids.contains(a.id.as_str());
            let asked_b = asked_ids.contains(b.id.as_str());
            asked_a
                .cmp(&asked_b)
                .then((a.difficulty - theta).abs().total_cmp(&(b.difficulty - theta).abs()))
                .then_with(|| a.id.cmp(&b.id))
        })
}

fn render_prompt(question_type: QuestionType, skill_id: &str, base: Option<&Item>) -> String {
    let skill = skill_id.replace(['-', '_'], " ");
    let problem = base
        .map(|item| {
            if item.content.trim().is_empty() {
                item.id.clone()
            } else {
                item.content.clone()
            }
        })
        .unwrap_or_else(|| NO_BASE_PROBLEM.to_string());

    question_type
        .template()
        .replace("{skill}", &skill)
        .replace("{problem}", &problem)
}

/// Whether the interview can close.
///
/// Every question must have a response. Each must also be graded, unless
/// its attempt budget is spent or the interview has run past its time budget.
pub fn is_complete(
    questions: &[InterviewQuestion],
    interview_started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &InterviewConfig,
) -> bool {
    if questions.iter().any(|q| q.response.is_none()) {
        return false;
    }

    let out_of_time = interview_started_at
        .map(|start| now - start >= Duration::minutes(config.time_budget_minutes))
        .unwrap_or(false);

    out_of_time
        || questions
            .iter()
            .all(|q| q.is_settled(config.max_evaluation_attempts))
}
