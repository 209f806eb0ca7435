//! Frontier detection and interview candidate ranking.
//!
//! Runs once, after the screener terminates, over the chronological history.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::response::ItemResponse;
use crate::config::FrontierConfig;
use crate::item_bank::SkillCategory;

/// Edge of demonstrated competence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontier {
    pub skill_id: String,
    pub difficulty_level: f64,
    /// Theta at the time the learner first failed at this level.
    pub first_failure_theta: f64,
}

/// Why a skill was queued for the interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterviewReason {
    FailedNearTheta,
    SlowCorrectNearTheta,
}

impl InterviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewReason::FailedNearTheta => "failed-near-theta",
            InterviewReason::SlowCorrectNearTheta => "slow-correct-near-theta",
        }
    }
}

/// A skill worth probing in the interview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewCandidate {
    pub skill_id: String,
    pub skill_category: SkillCategory,
    pub reason: InterviewReason,
    pub problem_id: String,
    pub difficulty: f64,
    /// `|b - θ|` for the evidence item.
    pub distance: f64,
}

/// Everything the detector produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontierAnalysis {
    pub frontier: Option<Frontier>,
    pub candidates: Vec<InterviewCandidate>,
}

/// Locate the frontier and rank interview candidates around `theta`.
pub fn detect(responses: &[ItemResponse], theta: f64, config: &FrontierConfig) -> FrontierAnalysis {
    FrontierAnalysis {
        frontier: locate_frontier(responses, theta, config.epsilon),
        candidates: rank_candidates(responses, theta, config),
    }
}

fn locate_frontier(responses: &[ItemResponse], theta: f64, epsilon: f64) -> Option<Frontier> {
    let failures = responses.iter().filter(|r| !r.correct);

    let within = failures
        .clone()
        .find(|r| (r.difficulty - theta).abs() <= epsilon);

    // No failure within epsilon: fall back to the closest one.
    let chosen = within.or_else(|| {
        failures.fold(None, |best: Option<&ItemResponse>, r| match best {
            Some(b) if (b.difficulty - theta).abs() <= (r.difficulty - theta).abs() => Some(b),
            _ => Some(r),
        })
    })?;

    Some(Frontier {
        skill_id: chosen.skill_id.clone(),
        difficulty_level: chosen.difficulty,
        first_failure_theta: chosen.theta_at_time,
    })
}

fn rank_candidates(
    responses: &[ItemResponse],
    theta: f64,
    config: &FrontierConfig,
) -> Vec<InterviewCandidate> {
    let mut by_skill: BTreeMap<&str, InterviewCandidate> = BTreeMap::new();

    for r in responses {
        let distance = (r.difficulty - theta).abs();
        let reason = if !r.correct && distance < config.failed_window {
            InterviewReason::FailedNearTheta
        } else if r.correct
            && distance < config.slow_window
            && r.response_time_ms > config.slow_response_ms
        {
            InterviewReason::SlowCorrectNearTheta
        } else {
            continue;
        };

        let candidate = InterviewCandidate {
            skill_id: r.skill_id.clone(),
            skill_category: r.skill_category,
            reason,
            problem_id: r.problem_id.clone(),
            difficulty: r.difficulty,
            distance,
        };

        match by_skill.get(r.skill_id.as_str()) {
            Some(existing) if !beats(&candidate, existing) => {}
            _ => {
                by_skill.insert(&r.skill_id, candidate);
            }
        }
    }

    let mut ranked: Vec<InterviewCandidate> = by_skill.into_values().collect();
    ranked.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.reason.cmp(&b.reason))
            .then_with(|| a.skill_id.cmp(&b.skill_id))
    });

    diversify(ranked, config.max_interview_skills)
}

/// Closer evidence wins; on equal distance a failure beats a slow success.
fn beats(candidate: &InterviewCandidate, existing: &InterviewCandidate) -> bool {
    const EPS: f64 = 1e-9;
    if (candidate.distance - existing.distance).abs() > EPS {
        candidate.distance < existing.distance
    } else {
        candidate.reason < existing.reason
    }
}

/// Take one candidate per category in rank order, then fill up to `cap`.
fn diversify(ranked: Vec<InterviewCandidate>, cap: usize) -> Vec<InterviewCandidate> {
    let mut seen = BTreeSet::new();
    let mut picked = vec![false; ranked.len()];
    let mut count = 0;

    for (i, c) in ranked.iter().enumerate() {
        if count == cap {
            break;
        }
        if seen.insert(c.skill_category) {
            picked[i] = true;
            count += 1;
        }
    }
    for flag in picked.iter_mut() {
        if count == cap {
            break;
        }
        if !*flag {
            *flag = true;
            count += 1;
        }
    }

    ranked
        .into_iter()
        .zip(picked)
        .filter_map(|(c, keep)| keep.then_some(c))
        .collect()
}
