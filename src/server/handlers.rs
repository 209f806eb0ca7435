use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::assessment::{
    AnswerParams, InterviewResponseParams, RetryEvaluationParams, SessionParams, StartParams,
};
use crate::error::{McpError, McpResult};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");
    let engine = &state.engine;

    match tool_name {
        "assessment_start" => {
            execute_handler(tool_name, arguments, |params: StartParams| {
                engine.start(params)
            })
            .await
        }
        "assessment_submit_answer" => {
            execute_handler(tool_name, arguments, |params: AnswerParams| {
                engine.submit_answer(params)
            })
            .await
        }
        "assessment_interview_respond" => {
            execute_handler(tool_name, arguments, |params: InterviewResponseParams| {
                engine.respond_interview(params)
            })
            .await
        }
        "assessment_retry_evaluation" => {
            execute_handler(tool_name, arguments, |params: RetryEvaluationParams| {
                engine.retry_evaluation(params)
            })
            .await
        }
        "assessment_get_session" => {
            execute_handler(tool_name, arguments, |params: SessionParams| {
                engine.get_session(params)
            })
            .await
        }
        "assessment_report" => {
            execute_handler(tool_name, arguments, |params: SessionParams| {
                engine.report(params)
            })
            .await
        }
        "assessment_profile" => {
            execute_handler(tool_name, arguments, |params: SessionParams| {
                engine.profile(params)
            })
            .await
        }
        "assessment_purge_expired" => handle_purge_expired(state).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

async fn handle_purge_expired(state: &SharedState) -> McpResult<Value> {
    let removed = state
        .engine
        .purge_expired()
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    Ok(serde_json::json!({ "removed": removed }))
}

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Parse arguments, run an engine operation and serialize its result.
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments_missing() {
        let result: McpResult<SessionParams> = parse_arguments("assessment_report", None);
        match result {
            Err(McpError::InvalidParameters { tool_name, message }) => {
                assert_eq!(tool_name, "assessment_report");
                assert_eq!(message, "Missing arguments");
            }
            _ => panic!("expected InvalidParameters"),
        }
    }

    #[test]
    fn test_parse_arguments_wrong_shape() {
        let result: McpResult<AnswerParams> = parse_arguments(
            "assessment_submit_answer",
            Some(json!({"session_id": "s", "learner_id": "l", "item_id": "i"})),
        );
        assert!(matches!(result, Err(McpError::InvalidParameters { .. })));
    }

    #[test]
    fn test_parse_arguments_ok() {
        let params: RetryEvaluationParams = parse_arguments(
            "assessment_retry_evaluation",
            Some(json!({"session_id": "s", "learner_id": "l"})),
        )
        .unwrap();
        assert!(params.question_id.is_none());
    }
}
