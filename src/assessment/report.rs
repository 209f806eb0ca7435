//! Read-only summaries built from a session: the screener report and the
//! payload handed to the downstream profile updater.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::grading::Evaluation;
use super::interview::QuestionType;
use super::session::{AssessmentSession, Phase, SessionType};
use crate::cat::{
    detect_pattern, theta_to_grade_level, theta_to_percentile, unbounded, Frontier,
    InterviewReason, PerformancePattern,
};

/// Skills grouped by how the learner did on them relative to theta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillBreakdown {
    pub mastered: Vec<String>,
    pub learning: Vec<String>,
    pub ready: Vec<String>,
    pub frontier: Vec<String>,
}

/// Summary of the screener phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenerReport {
    pub session_id: String,
    pub session_type: SessionType,
    pub theta: f64,
    #[serde(with = "unbounded")]
    pub standard_error: f64,
    pub confidence: f64,
    pub low_confidence: bool,
    pub percentile: u8,
    pub grade_level: u8,
    pub status: String,
    pub questions_answered: usize,
    pub correct_count: usize,
    /// Percent correct, rounded.
    pub accuracy: u8,
    pub duration_ms: i64,
    pub average_time_per_question_ms: u64,
    pub skills: SkillBreakdown,
    pub category_counts: BTreeMap<String, u32>,
    pub frontier: Option<Frontier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PerformancePattern>,
    pub recommended_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub growth: Option<GrowthSummary>,
}

/// Growth status from a growth check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GrowthStatus {
    SignificantGrowth,
    SomeGrowth,
    Stable,
    ReviewNeeded,
}

impl GrowthStatus {
    pub fn from_change(theta_change: f64) -> Self {
        if theta_change > 0.3 {
            GrowthStatus::SignificantGrowth
        } else if theta_change > 0.1 {
            GrowthStatus::SomeGrowth
        } else if theta_change > -0.1 {
            GrowthStatus::Stable
        } else {
            GrowthStatus::ReviewNeeded
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            GrowthStatus::SignificantGrowth => "Great progress! You've clearly been learning.",
            GrowthStatus::SomeGrowth => "Nice! You're moving in the right direction.",
            GrowthStatus::Stable => "Holding steady. Keep practicing!",
            GrowthStatus::ReviewNeeded => "Looks like some topics need a refresher.",
        }
    }
}

/// Change since the learner's previous assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthSummary {
    pub previous_theta: f64,
    pub current_theta: f64,
    pub theta_change: f64,
    pub percentile_change: i16,
    pub status: GrowthStatus,
    pub message: String,
}

impl GrowthSummary {
    pub fn new(previous_theta: f64, current_theta: f64) -> Self {
        let theta_change = current_theta - previous_theta;
        let status = GrowthStatus::from_change(theta_change);
        Self {
            previous_theta,
            current_theta,
            theta_change,
            percentile_change: i16::from(theta_to_percentile(current_theta))
                - i16::from(theta_to_percentile(previous_theta)),
            status,
            message: status.message().to_string(),
        }
    }
}

/// Graded interview answer, as exposed downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewResult {
    pub question_id: String,
    pub skill_id: String,
    pub question_type: QuestionType,
    pub reason: InterviewReason,
    pub response: Option<String>,
    pub evaluation: Option<Evaluation>,
    pub evaluation_attempts: u32,
}

/// Payload for the downstream profile updater, available once complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub session_id: String,
    pub learner_id: String,
    pub session_type: SessionType,
    pub estimated_ability: f64,
    #[serde(with = "unbounded")]
    pub standard_error: f64,
    pub percentile: u8,
    pub skills_assessed: Vec<String>,
    pub frontier: Option<Frontier>,
    pub interview_results: Vec<InterviewResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub growth: Option<GrowthSummary>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Group skills by accuracy and average difficulty against `theta`.
///
/// Mastered: at least 80% correct with average difficulty more than 0.5
/// below theta. Frontier: average difficulty within 0.5 of theta. Learning:
/// some correct at or below theta. Everything else is ready to learn.
pub fn categorize_skills(session: &AssessmentSession) -> SkillBreakdown {
    #[derive(Default)]
    struct Tally {
        attempts: usize,
        correct: usize,
        difficulty_sum: f64,
    }

    let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();
    for r in &session.responses {
        let t = tallies.entry(r.skill_id.as_str()).or_default();
        t.attempts += 1;
        t.difficulty_sum += r.difficulty;
        if r.correct {
            t.correct += 1;
        }
    }

    let theta = session.theta;
    let mut out = SkillBreakdown::default();
    for (skill, t) in tallies {
        let accuracy = t.correct as f64 / t.attempts as f64;
        let avg = t.difficulty_sum / t.attempts as f64;
        let bucket = if accuracy >= 0.8 && avg < theta - 0.5 {
            &mut out.mastered
        } else if (avg - theta).abs() < 0.5 {
            &mut out.frontier
        } else if t.correct > 0 && avg <= theta {
            &mut out.learning
        } else {
            &mut out.ready
        };
        bucket.push(skill.to_string());
    }
    out
}

fn growth_for(session: &AssessmentSession) -> Option<GrowthSummary> {
    match session.session_type {
        SessionType::GrowthCheck => session
            .previous_theta
            .map(|prev| GrowthSummary::new(prev, session.theta)),
        SessionType::StartingPoint => None,
    }
}

impl ScreenerReport {
    pub fn from_session(session: &AssessmentSession) -> Self {
        let total = session.question_count();
        let correct_count = session.responses.iter().filter(|r| r.correct).count();
        let accuracy = if total > 0 {
            (correct_count as f64 / total as f64 * 100.0).round() as u8
        } else {
            0
        };

        let end = session.screener_completed_at.unwrap_or(session.updated_at);
        let duration_ms = (end - session.created_at).num_milliseconds().max(0);
        let total_response_ms: u64 = session.responses.iter().map(|r| r.response_time_ms).sum();

        Self {
            session_id: session.id.clone(),
            session_type: session.session_type,
            theta: session.theta,
            standard_error: session.standard_error,
            confidence: session.confidence,
            low_confidence: session.low_confidence,
            percentile: theta_to_percentile(session.theta),
            grade_level: theta_to_grade_level(session.theta),
            status: session.screener_state.status().to_string(),
            questions_answered: total,
            correct_count,
            accuracy,
            duration_ms,
            average_time_per_question_ms: if total > 0 {
                total_response_ms / total as u64
            } else {
                0
            },
            skills: categorize_skills(session),
            category_counts: session
                .coverage
                .category_counts()
                .into_iter()
                .map(|(c, n)| (c.to_string(), n))
                .collect(),
            frontier: session.frontier.clone(),
            pattern: detect_pattern(&session.responses, session.theta),
            recommended_action: match session.phase {
                Phase::Screener => "continue-screener",
                Phase::Interview => "interview",
                Phase::Complete => "complete",
            }
            .to_string(),
            growth: growth_for(session),
        }
    }
}

impl ProfileUpdate {
    pub fn from_session(session: &AssessmentSession) -> Self {
        Self {
            session_id: session.id.clone(),
            learner_id: session.learner_id.clone(),
            session_type: session.session_type,
            estimated_ability: session.theta,
            standard_error: session.standard_error,
            percentile: theta_to_percentile(session.theta),
            skills_assessed: session.tested_skills().into_iter().collect(),
            frontier: session.frontier.clone(),
            interview_results: session
                .interview_questions
                .iter()
                .map(|q| InterviewResult {
                    question_id: q.question_id.clone(),
                    skill_id: q.skill_id.clone(),
                    question_type: q.question_type,
                    reason: q.reason,
                    response: q.response.as_ref().map(|r| r.text.clone()),
                    evaluation: q.evaluation.clone(),
                    evaluation_attempts: q.evaluation_attempts,
                })
                .collect(),
            growth: growth_for(session),
            completed_at: session.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cat::{ItemResponse, Prior};
    use crate::config::ConvergenceThresholds;
    use crate::item_bank::SkillCategory;
    use chrono::Duration;

    fn response(skill: &str, difficulty: f64, correct: bool) -> ItemResponse {
        ItemResponse {
            problem_id: format!("{skill}-{difficulty}"),
            skill_id: skill.to_string(),
            skill_category: SkillCategory::Algebra,
            difficulty,
            discrimination: 1.0,
            correct,
            response_time_ms: 10_000,
            theta_before: 0.0,
            theta_at_time: 0.0,
            se_at_time: 0.5,
            information_gained: 0.2,
            question_number: 1,
            answered_at: Utc::now(),
        }
    }

    fn session_with(responses: Vec<ItemResponse>, theta: f64) -> AssessmentSession {
        let mut s = AssessmentSession::new(
            "learner",
            SessionType::StartingPoint,
            Prior::new(0.0, 1.25),
            ConvergenceThresholds::starting_point(),
            Duration::hours(24),
        );
        s.responses = responses;
        s.theta = theta;
        s
    }

    #[test]
    fn test_categorize_skills() {
        let s = session_with(
            vec![
                response("easy", -1.5, true),
                response("easy", -1.2, true),
                response("near", 0.1, false),
                response("below", -0.3, true),
                response("below", -0.5, false),
                response("hard", 1.5, false),
            ],
            0.0,
        );
        let skills = categorize_skills(&s);
        assert_eq!(skills.mastered, vec!["easy"]);
        assert_eq!(skills.frontier, vec!["below", "near"]);
        assert_eq!(skills.ready, vec!["hard"]);
        assert!(skills.learning.is_empty());
    }

    #[test]
    fn test_frontier_band_is_exclusive() {
        // Average difficulty exactly 0.5 below theta is outside the band
        let s = session_with(
            vec![response("edge", -0.25, true), response("edge", -0.75, false)],
            0.0,
        );
        let skills = categorize_skills(&s);
        assert!(skills.frontier.is_empty());
        assert_eq!(skills.learning, vec!["edge"]);
    }

    #[test]
    fn test_learning_bucket() {
        let s = session_with(
            vec![response("mixed", -0.8, true), response("mixed", -0.8, false)],
            0.0,
        );
        assert_eq!(categorize_skills(&s).learning, vec!["mixed"]);
    }

    #[test]
    fn test_report_accuracy_and_average_time() {
        let s = session_with(
            vec![
                response("a", 0.0, true),
                response("b", 0.0, true),
                response("c", 0.0, false),
            ],
            0.4,
        );
        let report = ScreenerReport::from_session(&s);
        assert_eq!(report.questions_answered, 3);
        assert_eq!(report.correct_count, 2);
        assert_eq!(report.accuracy, 67);
        assert_eq!(report.average_time_per_question_ms, 10_000);
        assert_eq!(report.recommended_action, "continue-screener");
        assert!(report.growth.is_none());
    }

    #[test]
    fn test_report_flags_foundational_run() {
        let s = session_with(
            (0..5).map(|_| response("basics", -1.0, false)).collect(),
            -2.1,
        );
        let report = ScreenerReport::from_session(&s);
        assert_eq!(report.pattern, Some(PerformancePattern::FoundationalNeeds));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["pattern"], "foundational-needs");
    }

    #[test]
    fn test_growth_status_thresholds() {
        assert_eq!(GrowthStatus::from_change(0.5), GrowthStatus::SignificantGrowth);
        assert_eq!(GrowthStatus::from_change(0.2), GrowthStatus::SomeGrowth);
        assert_eq!(GrowthStatus::from_change(0.0), GrowthStatus::Stable);
        assert_eq!(GrowthStatus::from_change(-0.3), GrowthStatus::ReviewNeeded);

        let summary = GrowthSummary::new(0.0, 1.0);
        assert_eq!(summary.percentile_change, 34);
        assert_eq!(summary.status, GrowthStatus::SignificantGrowth);
    }
}
