//! Persistence for assessment sessions and grading invocations.
//!
//! Sessions are stored as a JSON document alongside a few indexed columns
//! used for lookup and expiry.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assessment::{AssessmentSession, SessionType};
use crate::error::StorageResult;

/// Log entry for one call out to the grading pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique invocation identifier.
    pub id: String,
    /// Session the call belongs to.
    pub session_id: Option<String>,
    /// Tool that triggered the call.
    pub tool_name: String,
    /// Input parameters as JSON.
    pub input: serde_json::Value,
    /// Output as JSON (if successful).
    pub output: Option<serde_json::Value>,
    /// Langbase pipe called, if any.
    pub pipe_name: Option<String>,
    pub latency_ms: Option<i64>,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Invocation {
    /// Create a new invocation log entry
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: None,
            tool_name: tool_name.into(),
            input,
            output: None,
            pipe_name: None,
            latency_ms: None,
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_pipe(mut self, pipe_name: impl Into<String>) -> Self {
        self.pipe_name = Some(pipe_name.into());
        self
    }

    /// Mark as successful with output
    pub fn success(mut self, output: serde_json::Value, latency_ms: i64) -> Self {
        self.success = true;
        self.output = Some(output);
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Mark as failed with error
    pub fn failure(mut self, error: impl Into<String>, latency_ms: i64) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Session store.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_session(&self, session: &AssessmentSession) -> StorageResult<()>;

    async fn get_session(&self, id: &str) -> StorageResult<Option<AssessmentSession>>;

    /// Replace a stored session. Fails with `SessionNotFound` if it does not exist.
    async fn update_session(&self, session: &AssessmentSession) -> StorageResult<()>;

    async fn delete_session(&self, id: &str) -> StorageResult<()>;

    /// Most recent unexpired, incomplete session for a learner and type.
    async fn get_active_session(
        &self,
        learner_id: &str,
        session_type: SessionType,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<AssessmentSession>>;

    /// Delete sessions whose `expires_at` has passed. Returns the number removed.
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<u64>;

    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()>;

    async fn get_session_invocations(&self, session_id: &str) -> StorageResult<Vec<Invocation>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invocation_builders() {
        let inv = Invocation::new("assessment_interview_respond", json!({"q": 1}))
            .with_session("sess-1")
            .with_pipe("grader")
            .success(json!({"rating": "good"}), 120);

        assert!(inv.success);
        assert_eq!(inv.session_id.as_deref(), Some("sess-1"));
        assert_eq!(inv.pipe_name.as_deref(), Some("grader"));
        assert_eq!(inv.latency_ms, Some(120));
        assert_eq!(inv.output.unwrap()["rating"], "good");
    }

    #[test]
    fn test_invocation_failure() {
        let inv = Invocation::new("assessment_retry_evaluation", json!({})).failure("timeout", 30);
        assert!(!inv.success);
        assert_eq!(inv.error.as_deref(), Some("timeout"));
        assert!(inv.output.is_none());
    }
}
