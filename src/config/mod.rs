use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub assessment: AssessmentConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Pipe that grades free-text interview responses.
    pub grader: String,
}

/// Everything the assessment engine needs besides its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentConfig {
    pub item_bank_path: PathBuf,
    pub session_ttl_hours: i64,
    pub estimator: EstimatorConfig,
    pub selector: SelectorConfig,
    pub frontier: FrontierConfig,
    pub interview: InterviewConfig,
    pub starting_point: ConvergenceThresholds,
    pub growth_check: ConvergenceThresholds,
}

/// MAP solver settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    /// Prior standard deviation; the prior mean comes from the session.
    pub prior_sd: f64,
    /// Theta is clamped to `[-theta_bound, theta_bound]`.
    pub theta_bound: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    /// Largest Newton step, in logits.
    pub max_step: f64,
    /// Standard error that maps to zero confidence.
    pub se_max: f64,
}

/// Item selection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorConfig {
    pub initial_window: f64,
    pub window_step: f64,
    pub max_skill_repeats: u32,
}

/// Frontier detection and interview candidate settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierConfig {
    pub epsilon: f64,
    pub failed_window: f64,
    pub slow_window: f64,
    pub slow_response_ms: u64,
    pub max_interview_skills: usize,
}

/// Interview grading budget.
#[derive(Debug, Clone, PartialEq)]
pub struct InterviewConfig {
    pub max_evaluation_attempts: u32,
    pub time_budget_minutes: i64,
}

/// Stopping-rule thresholds copied onto each session at creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceThresholds {
    pub min_questions: usize,
    pub target_questions: usize,
    pub max_questions: usize,
    pub se_threshold_stringent: f64,
    pub se_threshold_acceptable: f64,
    pub se_threshold_fallback: f64,
    pub min_information_gain: f64,
    pub plateau_window: usize,
}

impl ConvergenceThresholds {
    /// Thresholds for a full placement screener.
    pub fn starting_point() -> Self {
        Self {
            min_questions: 8,
            target_questions: 15,
            max_questions: 30,
            se_threshold_stringent: 0.25,
            se_threshold_acceptable: 0.30,
            se_threshold_fallback: 0.40,
            min_information_gain: 0.08,
            plateau_window: 3,
        }
    }

    /// Thresholds for a short growth check against a known ability.
    pub fn growth_check() -> Self {
        Self {
            min_questions: 5,
            target_questions: 8,
            max_questions: 20,
            ..Self::starting_point()
        }
    }
}

impl ConvergenceThresholds {
    fn validate(&self, label: &str) -> Result<(), AppError> {
        if self.max_questions == 0
            || self.min_questions > self.target_questions
            || self.target_questions > self.max_questions
        {
            return Err(config_error(format!(
                "{} thresholds need 0 < min <= target <= max questions (got {}/{}/{})",
                label, self.min_questions, self.target_questions, self.max_questions
            )));
        }
        let se = [
            self.se_threshold_stringent,
            self.se_threshold_acceptable,
            self.se_threshold_fallback,
        ];
        if se.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(config_error(format!(
                "{} SE thresholds must be positive",
                label
            )));
        }
        Ok(())
    }
}

impl AssessmentConfig {
    /// Reject settings the estimator or selector cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        let estimator = &self.estimator;
        if !estimator.prior_sd.is_finite() || estimator.prior_sd <= 0.0 {
            return Err(config_error(format!(
                "CAT_PRIOR_SD must be a positive number (got {})",
                estimator.prior_sd
            )));
        }
        if !estimator.theta_bound.is_finite() || estimator.theta_bound <= 0.0 {
            return Err(config_error(format!(
                "CAT_THETA_BOUND must be a positive number (got {})",
                estimator.theta_bound
            )));
        }
        if !estimator.se_max.is_finite() || estimator.se_max <= 0.0 {
            return Err(config_error(format!(
                "CAT_SE_MAX must be a positive number (got {})",
                estimator.se_max
            )));
        }
        if self.session_ttl_hours <= 0 {
            return Err(config_error(format!(
                "SESSION_TTL_HOURS must be positive (got {})",
                self.session_ttl_hours
            )));
        }
        self.starting_point.validate("starting-point")?;
        self.growth_check.validate("growth-check")
    }
}

fn config_error(message: String) -> AppError {
    AppError::Config { message }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/assessment.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 30000),
            max_retries: parse_env("MAX_RETRIES", 3),
            retry_delay_ms: parse_env("RETRY_DELAY_MS", 1000),
        };

        let pipes = PipeConfig {
            grader: env::var("PIPE_GRADER").unwrap_or_else(|_| PipeConfig::default().grader),
        };

        let defaults = AssessmentConfig::default();
        let assessment = AssessmentConfig {
            item_bank_path: env::var("ITEM_BANK_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.item_bank_path),
            session_ttl_hours: parse_env("SESSION_TTL_HOURS", defaults.session_ttl_hours),
            estimator: EstimatorConfig {
                prior_sd: parse_env("CAT_PRIOR_SD", defaults.estimator.prior_sd),
                theta_bound: parse_env("CAT_THETA_BOUND", defaults.estimator.theta_bound),
                se_max: parse_env("CAT_SE_MAX", defaults.estimator.se_max),
                ..defaults.estimator
            },
            frontier: FrontierConfig {
                slow_response_ms: parse_env(
                    "CAT_SLOW_RESPONSE_MS",
                    defaults.frontier.slow_response_ms,
                ),
                max_interview_skills: parse_env(
                    "CAT_MAX_INTERVIEW_SKILLS",
                    defaults.frontier.max_interview_skills,
                ),
                ..defaults.frontier
            },
            interview: InterviewConfig {
                max_evaluation_attempts: parse_env(
                    "INTERVIEW_MAX_EVALUATION_ATTEMPTS",
                    defaults.interview.max_evaluation_attempts,
                ),
                time_budget_minutes: parse_env(
                    "INTERVIEW_TIME_BUDGET_MINUTES",
                    defaults.interview.time_budget_minutes,
                ),
            },
            ..defaults
        };

        assessment.validate()?;

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            assessment,
        })
    }
}

/// Read and parse an environment variable, falling back on absence or parse failure.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            grader: "interview-grader-v1".to_string(),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            prior_sd: 1.25,
            theta_bound: 4.0,
            tolerance: 1e-4,
            max_iterations: 50,
            max_step: 1.0,
            se_max: 1.25,
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            initial_window: 0.5,
            window_step: 0.5,
            max_skill_repeats: 3,
        }
    }
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.75,
            failed_window: 0.7,
            slow_window: 0.5,
            slow_response_ms: 45_000,
            max_interview_skills: 3,
        }
    }
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            max_evaluation_attempts: 3,
            time_budget_minutes: 30,
        }
    }
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            item_bank_path: PathBuf::from("./data/item_bank.json"),
            session_ttl_hours: 24,
            estimator: EstimatorConfig::default(),
            selector: SelectorConfig::default(),
            frontier: FrontierConfig::default(),
            interview: InterviewConfig::default(),
            starting_point: ConvergenceThresholds::starting_point(),
            growth_check: ConvergenceThresholds::growth_check(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_check_thresholds_are_smaller() {
        let sp = ConvergenceThresholds::starting_point();
        let gc = ConvergenceThresholds::growth_check();

        assert!(gc.min_questions < sp.min_questions);
        assert!(gc.target_questions < sp.target_questions);
        assert!(gc.max_questions < sp.max_questions);
        assert_eq!(gc.se_threshold_stringent, sp.se_threshold_stringent);
        assert_eq!(gc.plateau_window, 3);
    }

    #[test]
    fn test_estimator_defaults() {
        let cfg = EstimatorConfig::default();
        assert_eq!(cfg.tolerance, 1e-4);
        assert_eq!(cfg.theta_bound, 4.0);
        assert_eq!(cfg.max_iterations, 50);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AssessmentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_degenerate_estimator() {
        for (prior_sd, theta_bound, se_max) in [
            (0.0, 4.0, 1.25),
            (-1.0, 4.0, 1.25),
            (f64::NAN, 4.0, 1.25),
            (1.25, -1.0, 1.25),
            (1.25, 0.0, 1.25),
            (1.25, f64::INFINITY, 1.25),
            (1.25, 4.0, 0.0),
        ] {
            let mut cfg = AssessmentConfig::default();
            cfg.estimator.prior_sd = prior_sd;
            cfg.estimator.theta_bound = theta_bound;
            cfg.estimator.se_max = se_max;
            assert!(
                matches!(cfg.validate(), Err(AppError::Config { .. })),
                "accepted prior_sd={} theta_bound={} se_max={}",
                prior_sd,
                theta_bound,
                se_max
            );
        }
    }

    #[test]
    fn test_validate_rejects_inverted_question_counts() {
        let mut cfg = AssessmentConfig::default();
        cfg.growth_check.target_questions = 25;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("growth-check"));

        let mut cfg = AssessmentConfig::default();
        cfg.starting_point.max_questions = 0;
        cfg.starting_point.min_questions = 0;
        cfg.starting_point.target_questions = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_assessment_defaults() {
        let cfg = AssessmentConfig::default();
        assert_eq!(cfg.session_ttl_hours, 24);
        assert_eq!(cfg.frontier.max_interview_skills, 3);
        assert_eq!(cfg.selector.max_skill_repeats, 3);
        assert_eq!(cfg.starting_point.max_questions, 30);
    }
}
