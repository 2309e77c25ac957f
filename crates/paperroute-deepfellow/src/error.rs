//! Error types for DeepFellow operations.

use thiserror::Error;

/// Errors that can occur when interacting with DeepFellow.
#[derive(Error, Debug)]
pub enum DeepfellowError {
    /// Connection error - unable to reach the server.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request timeout.
    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// API returned an error response.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read the input file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeepfellowError {
    /// Whether retrying the same request may succeed (timeouts, connection
    /// failures, 5xx and 429 responses).
    pub fn is_transient(&self) -> bool {
        match self {
            DeepfellowError::Connection(_) | DeepfellowError::Timeout { .. } => true,
            DeepfellowError::ApiError { status, .. } => *status >= 500 || *status == 429,
            DeepfellowError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Result type for DeepFellow operations.
pub type DeepfellowResult<T> = Result<T, DeepfellowError>;
