//! Bayesian MAP ability estimation.
//!
//! Maximizes `log L(responses | θ) + log N(θ; μ, σ)` by Newton-Raphson with
//! a bounded step. The log-posterior is strictly concave (the prior adds
//! `-1/σ²` to the second derivative), so the solve never divides by zero.

use serde::{Deserialize, Serialize};

use super::{item_information, probability_correct};
use crate::config::EstimatorConfig;

/// Normal prior on theta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub mean: f64,
    pub sd: f64,
}

impl Prior {
    pub fn new(mean: f64, sd: f64) -> Self {
        Self { mean, sd }
    }

    fn precision(&self) -> f64 {
        1.0 / (self.sd * self.sd)
    }
}

/// Item parameters and outcome for one response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub difficulty: f64,
    pub discrimination: f64,
    pub correct: bool,
}

/// Result of a MAP solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbilityEstimate {
    pub theta: f64,
    /// `+∞` when there are no responses.
    pub standard_error: f64,
    /// Sum of item information at the final theta.
    pub cumulative_information: f64,
    pub converged: bool,
    pub iterations: u32,
    /// The solve hit the theta bound or ran out of iterations.
    pub clamped: bool,
}

/// Estimate theta and its standard error from a response history.
pub fn estimate(responses: &[Observation], prior: Prior, config: &EstimatorConfig) -> AbilityEstimate {
    let bound = config.theta_bound;
    let start = prior.mean.clamp(-bound, bound);

    if responses.is_empty() {
        return AbilityEstimate {
            theta: start,
            standard_error: f64::INFINITY,
            cumulative_information: 0.0,
            converged: true,
            iterations: 0,
            clamped: false,
        };
    }

    let precision = prior.precision();
    let mut theta = start;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;

        let mut d1 = -(theta - prior.mean) * precision;
        let mut d2 = -precision;
        for r in responses {
            let p = probability_correct(theta, r.difficulty, r.discrimination);
            let u = if r.correct { 1.0 } else { 0.0 };
            d1 += r.discrimination * (u - p);
            d2 -= r.discrimination * r.discrimination * p * (1.0 - p);
        }

        let step = (-d1 / d2).clamp(-config.max_step, config.max_step);
        let next = (theta + step).clamp(-bound, bound);
        let moved = (next - theta).abs();
        theta = next;

        if moved < config.tolerance {
            converged = true;
            break;
        }
    }

    let on_bound = (theta.abs() - bound).abs() < f64::EPSILON;
    let cumulative_information = cumulative_information(responses, theta);

    AbilityEstimate {
        theta,
        standard_error: standard_error(cumulative_information, prior),
        cumulative_information,
        converged,
        iterations,
        clamped: !converged || on_bound,
    }
}

/// Total item information at `theta`.
pub fn cumulative_information(responses: &[Observation], theta: f64) -> f64 {
    responses
        .iter()
        .map(|r| item_information(theta, r.difficulty, r.discrimination))
        .sum()
}

/// Posterior standard error for a given amount of item information.
pub fn standard_error(cumulative_information: f64, prior: Prior) -> f64 {
    1.0 / (cumulative_information + prior.precision()).sqrt()
}

/// Map a standard error onto a 0-100 confidence score.
///
/// `100 · (1 - min(SE, se_max) / se_max)`; an unbounded SE scores 0.
pub fn confidence(standard_error: f64, se_max: f64) -> f64 {
    if !standard_error.is_finite() || se_max <= 0.0 {
        return 0.0;
    }
    100.0 * (1.0 - standard_error.min(se_max) / se_max)
}
