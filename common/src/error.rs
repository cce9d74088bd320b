use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Failure of a single outbound call (content, image or upload), classified for retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Parse(String),
    #[error("Rejected request: {0}")]
    Validation(String),
}

impl ServiceError {
    /// Transport failures, timeouts and HTTP 408/429/500/502/503/504 are retried.
    /// Everything else fails on the first attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            Self::Parse(_) | Self::Validation(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::Status { .. } => "status",
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::Status {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        if err.is_decode() {
            return Self::Parse(err.to_string());
        }
        if err.is_builder() {
            return Self::Validation(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}

impl From<object_store::Error> for ServiceError {
    fn from(err: object_store::Error) -> Self {
        if matches!(err, object_store::Error::Generic { .. }) {
            Self::Transport(err.to_string())
        } else {
            Self::Validation(err.to_string())
        }
    }
}

impl From<OpenAIError> for ServiceError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::Reqwest(inner) => Self::from(inner),
            OpenAIError::JSONDeserialize(inner) => Self::Parse(inner.to_string()),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Generation processing error: {0}")]
    Processing(String),
    #[error("Job could not start: {0}")]
    Startup(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
