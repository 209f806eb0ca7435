//! Multi-criterion stopping rules for the screener.
//!
//! [`evaluate`] is a pure function of the question count, current standard
//! error and per-item information history. [`ScreenerState`] folds each
//! verdict into the persisted state machine; once terminated it never moves.
//! [`detect_pattern`] flags sustained runs at either end of the scale for
//! display; it never changes a verdict.

use serde::{Deserialize, Serialize};

use super::response::ItemResponse;
use crate::config::ConvergenceThresholds;

const PATTERN_RUN: usize = 5;
const MASTERY_MIN_DIFFICULTY: f64 = 1.0;
const MASTERY_MIN_THETA: f64 = 1.5;
const FOUNDATIONAL_MAX_DIFFICULTY: f64 = -0.5;
const FOUNDATIONAL_MAX_THETA: f64 = -1.5;

/// Which convergence rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConvergenceReason {
    HighConfidence,
    AcceptableConfidence,
    Fallback,
}

/// Outcome of evaluating the stopping rules after one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceVerdict {
    Active,
    /// Information gain has flattened but SE is still above the fallback.
    Plateaued,
    Converged(ConvergenceReason),
    Maxed,
}

/// Why the screener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TerminationCause {
    Converged { reason: ConvergenceReason },
    MaxQuestions,
    InsufficientItems,
}

/// Persisted screener state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ScreenerState {
    #[default]
    Active,
    Plateaued,
    Terminated { cause: TerminationCause },
}

impl ScreenerState {
    /// Fold a verdict into the state. Terminated is absorbing.
    pub fn advance(self, verdict: ConvergenceVerdict) -> Self {
        if self.is_terminated() {
            return self;
        }
        match verdict {
            ConvergenceVerdict::Active => ScreenerState::Active,
            ConvergenceVerdict::Plateaued => ScreenerState::Plateaued,
            ConvergenceVerdict::Converged(reason) => ScreenerState::Terminated {
                cause: TerminationCause::Converged { reason },
            },
            ConvergenceVerdict::Maxed => ScreenerState::Terminated {
                cause: TerminationCause::MaxQuestions,
            },
        }
    }

    /// Terminate because the item bank ran out.
    pub fn exhaust(self) -> Self {
        if self.is_terminated() {
            return self;
        }
        ScreenerState::Terminated {
            cause: TerminationCause::InsufficientItems,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, ScreenerState::Terminated { .. })
    }

    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ScreenerState::Terminated {
                cause: TerminationCause::Converged { .. }
            }
        )
    }

    /// Short status label for turn output.
    pub fn status(&self) -> &'static str {
        match self {
            ScreenerState::Active => "active",
            ScreenerState::Plateaued => "plateaued",
            ScreenerState::Terminated { cause } => match cause {
                TerminationCause::Converged { .. } => "converged",
                TerminationCause::MaxQuestions => "max-questions",
                TerminationCause::InsufficientItems => "insufficient-items",
            },
        }
    }
}

/// Apply the stopping rules, in order.
///
/// 1. Fewer than `min_questions` responses: active.
/// 2. SE at or below the stringent threshold: converged.
/// 3. SE at or below the acceptable threshold with `target_questions` reached: converged.
/// 4. Mean information of the last `plateau_window` items below
///    `min_information_gain`: converged if SE is within the fallback
///    threshold, otherwise plateaued.
/// 5. `max_questions` reached: maxed, regardless of SE.
pub fn evaluate(
    question_count: usize,
    standard_error: f64,
    information_gains: &[f64],
    thresholds: &ConvergenceThresholds,
) -> ConvergenceVerdict {
    if question_count < thresholds.min_questions {
        return ConvergenceVerdict::Active;
    }
    if standard_error <= thresholds.se_threshold_stringent {
        return ConvergenceVerdict::Converged(ConvergenceReason::HighConfidence);
    }
    if standard_error <= thresholds.se_threshold_acceptable
        && question_count >= thresholds.target_questions
    {
        return ConvergenceVerdict::Converged(ConvergenceReason::AcceptableConfidence);
    }

    let plateaued = has_plateaued(information_gains, thresholds);
    if plateaued && standard_error <= thresholds.se_threshold_fallback {
        return ConvergenceVerdict::Converged(ConvergenceReason::Fallback);
    }
    if question_count >= thresholds.max_questions {
        return ConvergenceVerdict::Maxed;
    }
    if plateaued {
        ConvergenceVerdict::Plateaued
    } else {
        ConvergenceVerdict::Active
    }
}

fn has_plateaued(information_gains: &[f64], thresholds: &ConvergenceThresholds) -> bool {
    let window = thresholds.plateau_window;
    if window == 0 || information_gains.len() < window {
        return false;
    }
    let recent = &information_gains[information_gains.len() - window..];
    let mean = recent.iter().sum::<f64>() / window as f64;
    mean < thresholds.min_information_gain
}

/// Sustained performance at one end of the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerformancePattern {
    /// Last five correct on hard items with a high estimate.
    EarlyMastery,
    /// Last five incorrect on easy items with a low estimate.
    FoundationalNeeds,
}

/// Look at the last five responses for a mastery or foundational-needs run.
///
/// The average difficulty must be strictly above 1.0 (mastery) or below
/// -0.5 (foundational), and theta strictly beyond ±1.5.
pub fn detect_pattern(responses: &[ItemResponse], theta: f64) -> Option<PerformancePattern> {
    if responses.len() < PATTERN_RUN {
        return None;
    }
    let recent = &responses[responses.len() - PATTERN_RUN..];
    let average = recent.iter().map(|r| r.difficulty).sum::<f64>() / PATTERN_RUN as f64;

    if recent.iter().all(|r| r.correct)
        && average > MASTERY_MIN_DIFFICULTY
        && theta > MASTERY_MIN_THETA
    {
        Some(PerformancePattern::EarlyMastery)
    } else if recent.iter().all(|r| !r.correct)
        && average < FOUNDATIONAL_MAX_DIFFICULTY
        && theta < FOUNDATIONAL_MAX_THETA
    {
        Some(PerformancePattern::FoundationalNeeds)
    } else {
        None
    }
}

/// Coarse confidence label for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidenceLevel {
    Gathering,
    Low,
    Medium,
    High,
}

/// How far along the screener is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub percent_complete: u8,
    pub confidence_level: ConfidenceLevel,
    pub confidence_achieved: bool,
    pub question_count: usize,
    pub min_questions: usize,
    pub target_questions: usize,
    pub max_questions: usize,
}

impl Progress {
    /// Question-count progress up to `min_questions` (0-50%), then
    /// SE-driven progress from 1.0 down to the acceptable threshold (50-100%).
    pub fn compute(
        question_count: usize,
        standard_error: f64,
        thresholds: &ConvergenceThresholds,
    ) -> Self {
        let starting_se = 1.0;
        let target_se = thresholds.se_threshold_acceptable;

        let percent = if question_count < thresholds.min_questions {
            (question_count as f64 / thresholds.min_questions as f64 * 50.0).round()
        } else if starting_se <= target_se {
            100.0
        } else {
            let current = standard_error.min(starting_se).max(target_se);
            let ratio = (starting_se - current) / (starting_se - target_se);
            (50.0 + ratio * 50.0).round().min(100.0)
        };

        let confidence_level = if question_count < thresholds.min_questions {
            ConfidenceLevel::Gathering
        } else if standard_error <= thresholds.se_threshold_stringent {
            ConfidenceLevel::High
        } else if standard_error <= thresholds.se_threshold_acceptable {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        };

        Self {
            percent_complete: percent as u8,
            confidence_level,
            confidence_achieved: matches!(
                confidence_level,
                ConfidenceLevel::High | ConfidenceLevel::Medium
            ),
            question_count,
            min_questions: thresholds.min_questions,
            target_questions: thresholds.target_questions,
            max_questions: thresholds.max_questions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> ConvergenceThresholds {
        ConvergenceThresholds::starting_point()
    }

    fn flat(n: usize, gain: f64) -> Vec<f64> {
        vec![gain; n]
    }

    fn run(difficulties: &[f64], correct: bool) -> Vec<ItemResponse> {
        difficulties
            .iter()
            .enumerate()
            .map(|(i, &difficulty)| ItemResponse {
                problem_id: format!("p{i}"),
                skill_id: format!("s{i}"),
                skill_category: crate::item_bank::SkillCategory::Algebra,
                difficulty,
                discrimination: 1.0,
                correct,
                response_time_ms: 10_000,
                theta_before: 0.0,
                theta_at_time: 0.0,
                se_at_time: 1.0,
                information_gained: 0.2,
                question_number: i + 1,
                answered_at: chrono::Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_never_converges_before_min() {
        let t = thresholds();
        for qc in 0..t.min_questions {
            assert_eq!(
                evaluate(qc, 0.01, &flat(qc, 0.0), &t),
                ConvergenceVerdict::Active
            );
        }
    }

    #[test]
    fn test_stringent_converges_at_min() {
        let t = thresholds();
        assert_eq!(
            evaluate(8, 0.24, &flat(8, 0.5), &t),
            ConvergenceVerdict::Converged(ConvergenceReason::HighConfidence)
        );
    }

    #[test]
    fn test_acceptable_needs_target() {
        let t = thresholds();
        assert_eq!(evaluate(10, 0.28, &flat(10, 0.5), &t), ConvergenceVerdict::Active);
        assert_eq!(
            evaluate(15, 0.28, &flat(15, 0.5), &t),
            ConvergenceVerdict::Converged(ConvergenceReason::AcceptableConfidence)
        );
    }

    #[test]
    fn test_plateau_with_fallback_se_converges() {
        let t = thresholds();
        assert_eq!(
            evaluate(10, 0.38, &flat(10, 0.05), &t),
            ConvergenceVerdict::Converged(ConvergenceReason::Fallback)
        );
    }

    #[test]
    fn test_plateau_without_fallback_keeps_going() {
        let t = thresholds();
        assert_eq!(
            evaluate(10, 0.6, &flat(10, 0.05), &t),
            ConvergenceVerdict::Plateaued
        );
    }

    #[test]
    fn test_plateau_uses_only_recent_window() {
        let t = thresholds();
        let mut gains = flat(7, 0.01);
        gains.extend([0.3, 0.3, 0.3]);
        assert_eq!(evaluate(10, 0.38, &gains, &t), ConvergenceVerdict::Active);
    }

    #[test]
    fn test_maxed_regardless_of_se() {
        let t = thresholds();
        assert_eq!(evaluate(30, 0.9, &flat(30, 0.5), &t), ConvergenceVerdict::Maxed);
        assert_eq!(evaluate(30, 0.9, &flat(30, 0.01), &t), ConvergenceVerdict::Maxed);
    }

    #[test]
    fn test_state_machine_is_absorbing() {
        let state = ScreenerState::Active
            .advance(ConvergenceVerdict::Plateaued)
            .advance(ConvergenceVerdict::Converged(ConvergenceReason::Fallback));
        assert!(state.is_converged());
        assert_eq!(state.status(), "converged");

        let after = state.advance(ConvergenceVerdict::Active).exhaust();
        assert_eq!(after, state);
    }

    #[test]
    fn test_exhaust_status() {
        let state = ScreenerState::Plateaued.exhaust();
        assert_eq!(state.status(), "insufficient-items");
        assert!(!state.is_converged());
    }

    #[test]
    fn test_state_serde() {
        let state = ScreenerState::Terminated {
            cause: TerminationCause::Converged {
                reason: ConvergenceReason::AcceptableConfidence,
            },
        };
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["state"], "terminated");
        assert_eq!(json["cause"]["kind"], "converged");
        assert_eq!(json["cause"]["reason"], "acceptable-confidence");
        let back: ScreenerState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_progress_phases() {
        let t = thresholds();
        let early = Progress::compute(4, f64::INFINITY, &t);
        assert_eq!(early.percent_complete, 25);
        assert_eq!(early.confidence_level, ConfidenceLevel::Gathering);

        let mid = Progress::compute(10, 0.65, &t);
        assert_eq!(mid.percent_complete, 75);
        assert_eq!(mid.confidence_level, ConfidenceLevel::Low);

        let done = Progress::compute(12, 0.2, &t);
        assert_eq!(done.percent_complete, 100);
        assert_eq!(done.confidence_level, ConfidenceLevel::High);
        assert!(done.confidence_achieved);
    }

    #[test]
    fn test_early_mastery_pattern() {
        let responses = run(&[0.8, 1.2, 1.4, 1.6, 1.8], true);
        assert_eq!(
            detect_pattern(&responses, 1.9),
            Some(PerformancePattern::EarlyMastery)
        );
        // Theta not yet high enough
        assert_eq!(detect_pattern(&responses, 1.5), None);
        // Only four responses
        assert_eq!(detect_pattern(&responses[1..], 1.9), None);
    }

    #[test]
    fn test_foundational_needs_pattern() {
        let responses = run(&[-0.2, -0.6, -0.9, -1.1, -1.4], false);
        assert_eq!(
            detect_pattern(&responses, -1.8),
            Some(PerformancePattern::FoundationalNeeds)
        );

        let mut mixed = responses.clone();
        mixed[4].correct = true;
        assert_eq!(detect_pattern(&mixed, -1.8), None);
    }

    #[test]
    fn test_pattern_uses_last_five_only() {
        let mut responses = run(&[0.0, 0.0, 0.0], false);
        responses.extend(run(&[1.5, 1.5, 1.5, 1.5, 1.5], true));
        assert_eq!(
            detect_pattern(&responses, 2.0),
            Some(PerformancePattern::EarlyMastery)
        );
    }
}
