use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Assessment error: {0}")]
    Assessment(#[from] AssessmentError),

    #[error("Item bank error: {0}")]
    ItemBank(#[from] ItemBankError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Corrupt session record {session_id}: {message}")]
    CorruptRecord { session_id: String, message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Domain errors raised while applying a turn to an assessment session.
///
/// None of these leave a session partially updated: the engine only persists
/// after every check has passed.
#[derive(Debug, Error)]
pub enum AssessmentError {
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session expired: {session_id}")]
    SessionExpired { session_id: String },

    #[error("Session {session_id} is in phase {actual}, expected {expected}")]
    WrongPhase {
        session_id: String,
        expected: String,
        actual: String,
    },

    #[error("Phase cannot move from {from} to {to}")]
    PhaseRegression { from: String, to: String },

    #[error("Cannot complete session {session_id}: {unanswered} interview question(s) unanswered")]
    InterviewIncomplete {
        session_id: String,
        unanswered: usize,
    },

    #[error("Unknown item: {item_id}")]
    UnknownItem { item_id: String },

    #[error("Item {received} was not served; expected {expected}")]
    UnexpectedItem { expected: String, received: String },

    #[error("Interview question not found: {question_id}")]
    QuestionNotFound { question_id: String },

    #[error("Interview question {question_id} already answered")]
    AlreadyAnswered { question_id: String },

    #[error("Assessment not complete: {session_id}")]
    NotComplete { session_id: String },
}

/// Errors from the external grading collaborator.
#[derive(Debug, Error)]
pub enum GradingError {
    #[error("Grading service unavailable: {0}")]
    Unavailable(#[from] LangbaseError),

    #[error("Unparseable evaluation: {message}")]
    InvalidEvaluation { message: String },
}

/// Item bank loading errors
#[derive(Debug, Error)]
pub enum ItemBankError {
    #[error("Failed to read item bank {path}: {message}")]
    Io { path: String, message: String },

    #[error("Malformed item bank: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid item {item_id}: {reason}")]
    InvalidItem { item_id: String, reason: String },

    #[error("Duplicate item id: {item_id}")]
    DuplicateItem { item_id: String },
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// Result type alias for grading calls
pub type GradingResult<T> = Result<T, GradingError>;
