//! Adaptive assessment sessions.
//!
//! A session runs in two phases:
//! - a computerized adaptive screener that estimates ability (theta) with
//!   item selection and a stopping rule from [`crate::cat`]
//! - a short interview on the skills at the learner's frontier, graded by a
//!   [`Grader`]
//!
//! [`AssessmentEngine`] drives both phases and owns persistence through
//! [`AssessmentCore`].

mod core;
mod engine;
mod grading;
mod interview;
mod report;
mod session;

pub use self::core::*;
pub use engine::*;
pub use grading::*;
pub use interview::*;
pub use report::*;
pub use session::*;

use tracing::warn;

/// Serialize a value to JSON for the invocation log. Failures are logged
/// and replaced with an error object.
pub(crate) fn serialize_for_log<T: serde::Serialize>(
    value: &T,
    context: &str,
) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for invocation log"
        );
        serde_json::json!({
            "serialization_error": e.to_string(),
            "context": context
        })
    })
}

/// Pull a JSON document out of a grader completion.
///
/// Tries raw JSON first, then a ```json fenced block, then any fenced block.
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in completion. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}
