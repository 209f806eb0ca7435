//! Psychometric core of the adaptive screener.
//!
//! Everything in this module is synchronous and deterministic: the same
//! inputs always produce the same outputs. Async I/O lives in
//! [`crate::assessment`] and [`crate::storage`].
//!
//! All ability estimates use the two-parameter logistic (2PL) model:
//!
//! ```text
//! P(correct | θ) = 1 / (1 + exp(-a(θ - b)))
//! I(θ)           = a² · P · (1 - P)
//! ```

pub mod convergence;
pub mod coverage;
pub mod estimator;
pub mod frontier;
pub mod prior;
pub mod response;
pub mod selector;

pub use convergence::{
    detect_pattern, evaluate, ConfidenceLevel, ConvergenceReason, ConvergenceVerdict,
    PerformancePattern, Progress, ScreenerState, TerminationCause,
};
pub use coverage::SkillCoverage;
pub use estimator::{confidence, estimate, AbilityEstimate, Observation, Prior};
pub use frontier::{detect, Frontier, FrontierAnalysis, InterviewCandidate, InterviewReason};
pub use response::ItemResponse;
pub use selector::{select_next, select_next_preferring, Selection};

/// Probability of a correct response under the 2PL model.
pub fn probability_correct(theta: f64, difficulty: f64, discrimination: f64) -> f64 {
    1.0 / (1.0 + (-discrimination * (theta - difficulty)).exp())
}

/// Fisher information of one item at `theta`.
pub fn item_information(theta: f64, difficulty: f64, discrimination: f64) -> f64 {
    let p = probability_correct(theta, difficulty, discrimination);
    discrimination * discrimination * p * (1.0 - p)
}

/// Percentile rank of `theta` against a standard normal population.
pub fn theta_to_percentile(theta: f64) -> u8 {
    let cdf = 0.5 * (1.0 + erf(theta / std::f64::consts::SQRT_2));
    (cdf * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Rough school grade equivalent of `theta`.
pub fn theta_to_grade_level(theta: f64) -> u8 {
    if theta < -2.0 {
        5
    } else if theta < -1.0 {
        6
    } else if theta < 0.0 {
        7
    } else if theta < 1.0 {
        9
    } else if theta < 2.0 {
        11
    } else {
        12
    }
}

// Numerical Recipes erfc approximation, fractional error below 1.2e-7.
fn erf(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let tau = t
        * (-z * z - 1.265_512_23
            + t * (1.000_023_68
                + t * (0.374_091_96
                    + t * (0.096_784_18
                        + t * (-0.186_288_06
                            + t * (0.278_868_07
                                + t * (-1.135_203_98
                                    + t * (1.488_515_87
                                        + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
            .exp();
    if x >= 0.0 {
        1.0 - tau
    } else {
        tau - 1.0
    }
}

/// Serde adapter for standard errors, which are `+∞` before any response.
///
/// JSON has no infinity, so an unbounded value is written as `null` and
/// `null` reads back as `f64::INFINITY`.
pub mod unbounded {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}
