use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error taxonomy for calls to the upstream charting API
#[derive(Error, Debug)]
pub enum ChartApiError {
    #[error("Daily request quota exhausted, resets at {resets_at}")]
    QuotaExceeded { resets_at: DateTime<Utc> },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Timeout error: request took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Upstream rate limited the request (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("API error: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Invalid chart request: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },
}

/// Result type for upstream chart API operations
pub type ChartApiResult<T> = Result<T, ChartApiError>;

impl ChartApiError {
    /// Check if error is retryable
    ///
    /// Timeouts, 429, 5xx and transport failures are retried. Quota exhaustion,
    /// other 4xx and local errors never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChartApiError::Network(_) => true,
            ChartApiError::Timeout { .. } => true,
            ChartApiError::RateLimited { .. } => true,
            ChartApiError::Api { status_code, .. } => *status_code >= 500 || *status_code == 429,
            _ => false,
        }
    }

    /// Build an error from a non-success HTTP status
    pub fn from_status<S: Into<String>>(status_code: u16, message: S, retry_after: Option<u64>) -> Self {
        if status_code == 429 {
            ChartApiError::RateLimited { retry_after }
        } else {
            ChartApiError::Api {
                status_code,
                message: message.into(),
            }
        }
    }

    /// Create a validation error with field context
    pub fn validation_error<S: Into<String>>(field: S, message: S) -> Self {
        ChartApiError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a parse error with context
    pub fn parse_error<S: Into<String>>(message: S) -> Self {
        ChartApiError::Parse {
            message: message.into(),
        }
    }
}
