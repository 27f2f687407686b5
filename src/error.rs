//! Error types for assist-rs

use std::path::PathBuf;

use thiserror::Error;

use crate::services::http::AbortReason;

/// Result type alias using [`AssistError`]
pub type Result<T> = std::result::Result<T, AssistError>;

/// Main error type for assist-rs
#[derive(Debug, Error)]
pub enum AssistError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parse error
    #[error("Failed to parse config at {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// Configuration validation error
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    /// HTTP transport error, surfaced verbatim from the client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with an unexpected status
    #[error("Server responded with {status}{}", reason.as_deref().map(|r| format!(" {r}")).unwrap_or_default())]
    Status {
        status: u16,
        reason: Option<String>,
    },

    /// Streaming response did not carry the expected content type
    #[error("Unexpected Content-Type: expected {expected}, got {}", actual.as_deref().unwrap_or("<none>"))]
    ContentType {
        expected: &'static str,
        actual: Option<String>,
    },

    /// Request aborted by the caller or by its timeout
    #[error("{0}")]
    Aborted(AbortReason),

    /// Service envelope reported a failure code
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Service is unavailable; wraps the underlying failure
    #[error("Service is busy, please try again later")]
    Busy {
        #[source]
        source: Box<AssistError>,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl AssistError {
    /// Returns the abort reason if this error came from a cancel or timeout
    #[must_use]
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            Self::Aborted(reason) => Some(reason),
            Self::Busy { source } => source.abort_reason(),
            _ => None,
        }
    }

    /// Whether the error was caused by a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.abort_reason(), Some(AbortReason::Timeout(_)))
    }
}

impl From<String> for AssistError {
    fn from(s: String) -> Self {
        AssistError::Other(s)
    }
}

impl From<&str> for AssistError {
    fn from(s: &str) -> Self {
        AssistError::Other(s.to_string())
    }
}
