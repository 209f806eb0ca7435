//! Property-Based Tests for the adaptive screener
//!
//! Tests the following invariants:
//! - Estimation: theta stays within bounds, a correct answer never lowers
//!   theta relative to an incorrect one, a streak moves theta one way, and
//!   any response shrinks SE below the prior SD
//! - Confidence: bounded to [0, 100] and non-increasing in SE
//! - Stopping rules: never stop before min questions, always stop at max
//! - Selection: never re-serves an asked item
//! - Sessions: every answer pattern terminates within max questions

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::json;

use mcp_adaptive_assessment::assessment::{
    Answer, AnswerParams, AssessmentCore, AssessmentEngine, Evaluation, EvaluationRequest,
    Grader, Phase, SessionType, StartParams,
};
use mcp_adaptive_assessment::cat::estimator::standard_error;
use mcp_adaptive_assessment::cat::{
    confidence, estimate, evaluate, select_next, theta_to_percentile, ConvergenceVerdict,
    Observation, Prior, Selection, SkillCoverage,
};
use mcp_adaptive_assessment::config::{
    AssessmentConfig, ConvergenceThresholds, EstimatorConfig, SelectorConfig,
};
use mcp_adaptive_assessment::error::{GradingError, GradingResult};
use mcp_adaptive_assessment::item_bank::{InMemoryItemBank, Item, ItemBank, SkillCategory};
use mcp_adaptive_assessment::storage::SqliteStorage;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_observation() -> impl Strategy<Value = Observation> {
    ((-30i32..=30i32), (3u32..=25u32), any::<bool>()).prop_map(|(b, a, correct)| Observation {
        difficulty: b as f64 / 10.0,
        discrimination: a as f64 / 10.0,
        correct,
    })
}

fn arb_prior() -> impl Strategy<Value = Prior> {
    ((-25i32..=25i32), (5u32..=20u32))
        .prop_map(|(mean, sd)| Prior::new(mean as f64 / 10.0, sd as f64 / 10.0))
}

fn arb_thresholds() -> impl Strategy<Value = ConvergenceThresholds> {
    prop_oneof![
        Just(ConvergenceThresholds::starting_point()),
        Just(ConvergenceThresholds::growth_check()),
    ]
}

fn bank(n: usize) -> InMemoryItemBank {
    let items = (0..n)
        .map(|i| {
            Item::new(
                format!("item-{i:03}"),
                format!("skill-{}", i % 12),
                SkillCategory::ALL[i % 4],
                -3.0 + 6.0 * i as f64 / n as f64,
                0.8 + (i % 5) as f64 * 0.3,
            )
            .with_correct_answer("1")
        })
        .collect();
    InMemoryItemBank::from_items(items).unwrap()
}

struct UnusedGrader;

#[async_trait]
impl Grader for UnusedGrader {
    async fn evaluate(&self, _request: &EvaluationRequest) -> GradingResult<Evaluation> {
        Err(GradingError::InvalidEvaluation {
            message: "not graded in property tests".to_string(),
        })
    }
}

// ============================================================================
// Estimation
// ============================================================================

proptest! {
    #[test]
    fn prop_theta_within_bounds(
        responses in prop::collection::vec(arb_observation(), 0..40),
        prior in arb_prior(),
    ) {
        let config = EstimatorConfig::default();
        let result = estimate(&responses, prior, &config);

        prop_assert!(result.theta.is_finite());
        prop_assert!(result.theta.abs() <= config.theta_bound);
    }

    #[test]
    fn prop_correct_never_below_incorrect(
        history in prop::collection::vec(arb_observation(), 0..20),
        next in arb_observation(),
        prior in arb_prior(),
    ) {
        let config = EstimatorConfig::default();

        let mut with_correct = history.clone();
        with_correct.push(Observation { correct: true, ..next });
        let mut with_incorrect = history;
        with_incorrect.push(Observation { correct: false, ..next });

        let up = estimate(&with_correct, prior, &config).theta;
        let down = estimate(&with_incorrect, prior, &config).theta;
        prop_assert!(up >= down - 1e-3, "correct {} < incorrect {}", up, down);
    }

    #[test]
    fn prop_responses_shrink_standard_error(
        responses in prop::collection::vec(arb_observation(), 1..30),
        prior in arb_prior(),
    ) {
        let result = estimate(&responses, prior, &EstimatorConfig::default());

        prop_assert!(result.standard_error.is_finite());
        prop_assert!(result.standard_error < prior.sd);
    }

    #[test]
    fn prop_streak_moves_theta_monotonically(
        items in prop::collection::vec(((-30i32..=30i32), (3u32..=25u32)), 1..25),
        correct in any::<bool>(),
        prior in arb_prior(),
    ) {
        let config = EstimatorConfig::default();
        let mut streak: Vec<Observation> = items
            .into_iter()
            .map(|(b, a)| Observation {
                difficulty: b as f64 / 10.0,
                discrimination: a as f64 / 10.0,
                correct,
            })
            .collect();
        streak.sort_by(|x, y| x.difficulty.total_cmp(&y.difficulty));

        let mut previous = estimate(&[], prior, &config).theta;
        for len in 1..=streak.len() {
            let theta = estimate(&streak[..len], prior, &config).theta;
            if correct {
                prop_assert!(
                    theta >= previous - 1e-3,
                    "theta fell from {} to {} after {} correct",
                    previous,
                    theta,
                    len
                );
            } else {
                prop_assert!(
                    theta <= previous + 1e-3,
                    "theta rose from {} to {} after {} incorrect",
                    previous,
                    theta,
                    len
                );
            }
            previous = theta;
        }
    }

    #[test]
    fn prop_standard_error_non_increasing_in_information(
        info_a in 0.0f64..50.0,
        info_b in 0.0f64..50.0,
        prior in arb_prior(),
    ) {
        let (low, high) = if info_a <= info_b { (info_a, info_b) } else { (info_b, info_a) };
        let se_low = standard_error(low, prior);
        let se_high = standard_error(high, prior);

        prop_assert!(se_low >= se_high);
        prop_assert!(se_low <= prior.sd + 1e-12);
    }

    #[test]
    fn prop_estimate_is_deterministic(
        responses in prop::collection::vec(arb_observation(), 0..30),
        prior in arb_prior(),
    ) {
        let config = EstimatorConfig::default();
        prop_assert_eq!(
            estimate(&responses, prior, &config),
            estimate(&responses, prior, &config)
        );
    }

    #[test]
    fn prop_confidence_bounded_and_monotone(
        se_a in 0.0f64..3.0,
        se_b in 0.0f64..3.0,
    ) {
        let (low, high) = if se_a <= se_b { (se_a, se_b) } else { (se_b, se_a) };
        let c_low = confidence(low, 1.25);
        let c_high = confidence(high, 1.25);

        prop_assert!((0.0..=100.0).contains(&c_low));
        prop_assert!((0.0..=100.0).contains(&c_high));
        prop_assert!(c_low >= c_high);
    }

    #[test]
    fn prop_percentile_monotone(a in -4.0f64..4.0, b in -4.0f64..4.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(theta_to_percentile(low) <= theta_to_percentile(high));
    }
}

// ============================================================================
// Stopping rules and selection
// ============================================================================

proptest! {
    #[test]
    fn prop_never_stops_before_min(
        thresholds in arb_thresholds(),
        se in 0.0f64..2.0,
        gains in prop::collection::vec(0.0f64..1.0, 0..40),
    ) {
        let count = gains.len().min(thresholds.min_questions.saturating_sub(1));
        let verdict = evaluate(count, se, &gains[..count], &thresholds);
        prop_assert_eq!(verdict, ConvergenceVerdict::Active);
    }

    #[test]
    fn prop_always_stops_at_max(
        thresholds in arb_thresholds(),
        se in 0.0f64..2.0,
        gains in prop::collection::vec(0.0f64..1.0, 30..40),
    ) {
        let count = thresholds.max_questions;
        let verdict = evaluate(count, se, &gains[..count], &thresholds);
        prop_assert!(
            matches!(verdict, ConvergenceVerdict::Converged(_) | ConvergenceVerdict::Maxed),
            "verdict {:?} at max questions",
            verdict
        );
    }

    #[test]
    fn prop_selection_skips_asked_items(
        theta in -4.0f64..4.0,
        asked_mask in prop::collection::vec(any::<bool>(), 24),
    ) {
        let bank = bank(24);
        let asked: HashSet<&str> = bank
            .items()
            .iter()
            .zip(&asked_mask)
            .filter(|(_, flag)| **flag)
            .map(|(item, _)| item.id.as_str())
            .collect();

        let selection = select_next(
            theta,
            &asked,
            &SkillCoverage::new(),
            &bank,
            &SelectorConfig::default(),
        );

        match selection {
            Selection::Item(item) => prop_assert!(!asked.contains(item.id.as_str())),
            Selection::Exhausted => prop_assert_eq!(asked.len(), 24),
        }
    }
}

// ============================================================================
// Whole sessions
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_session_terminates_within_max(
        pattern in prop::collection::vec(any::<bool>(), 40),
        growth in any::<bool>(),
    ) {
        let final_turn = tokio_test::block_on(async {
            let storage = SqliteStorage::new_in_memory().await.unwrap();
            let core = AssessmentCore::new(
                Arc::new(storage),
                Arc::new(UnusedGrader),
                Arc::new(bank(48)),
            );
            let engine = AssessmentEngine::new(core, AssessmentConfig::default());

            let (session_type, previous_theta) = if growth {
                (SessionType::GrowthCheck, Some(0.5))
            } else {
                (SessionType::StartingPoint, None)
            };
            let mut turn = engine
                .start(StartParams {
                    learner_id: "prop-learner".to_string(),
                    session_type,
                    grade: None,
                    math_course: None,
                    previous_theta,
                    covered_skills: Vec::new(),
                })
                .await
                .unwrap();

            let mut answers = pattern.iter().cycle();
            while let Some(item) = turn.next_item.clone() {
                let correct = *answers.next().unwrap();
                turn = engine
                    .submit_answer(AnswerParams {
                        session_id: turn.session_id.clone(),
                        learner_id: "prop-learner".to_string(),
                        item_id: item.id,
                        answer: Answer {
                            value: json!(correct),
                            response_time_ms: 15_000,
                        },
                    })
                    .await
                    .unwrap();
            }
            turn
        });

        let max = if growth {
            ConvergenceThresholds::growth_check().max_questions
        } else {
            ConvergenceThresholds::starting_point().max_questions
        };
        prop_assert!(final_turn.question_count <= max);
        prop_assert_ne!(final_turn.phase, Phase::Screener);
        prop_assert!(final_turn.theta.abs() <= 4.0);
        prop_assert!(
            final_turn.converged || final_turn.question_count == max,
            "stopped at {} with status {}",
            final_turn.question_count,
            final_turn.status
        );
    }
}
