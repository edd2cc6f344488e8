/// Domain-specific error types for adaptest
///
/// Domain errors carry enough context (ids, field names) for the API layer
/// to map them onto HTTP statuses without string matching.

#[derive(Debug, thiserror::Error)]
pub enum AdaptestError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Question pool unavailable: {pool_id}")]
    PoolUnavailable { pool_id: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Session is not active: {id}")]
    SessionInactive { id: String },

    #[error("Question not found: {id}")]
    QuestionNotFound { id: String },

    #[error("Student not found: {id}")]
    StudentNotFound { id: String },

    #[error("Question {question_id} already submitted for session {session_id}")]
    DuplicateSubmission {
        session_id: String,
        question_id: String,
    },

    #[error("Remote source error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Remote source timeout after {seconds}s")]
    RemoteTimeout { seconds: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AdaptestError {
    fn from(e: sqlx::Error) -> Self {
        AdaptestError::Storage(e.to_string())
    }
}

impl From<redis::RedisError> for AdaptestError {
    fn from(e: redis::RedisError) -> Self {
        AdaptestError::Storage(e.to_string())
    }
}

impl AdaptestError {
    /// Helper to create validation errors with field names
    pub fn validation(field: &str, message: &str) -> Self {
        AdaptestError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }
}
