//! Error types for usagerank-core

use serde::Serialize;
use thiserror::Error;

/// Main error type for the usagerank-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied a bad period type, limit, date or range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A record fetch failed for one filter combination
    #[error("fetch failed for {metric}: {message}")]
    UpstreamFetch { metric: String, message: String },

    /// The caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// The fetch deadline elapsed
    #[error("deadline exceeded after {0} ms")]
    DeadlineExceeded(u64),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything else that went wrong inside the engine
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Integer status code surfaced to callers.
    pub fn code(&self) -> u16 {
        match self {
            Error::InvalidArgument(_) => 400,
            Error::Cancelled => 499,
            Error::DeadlineExceeded(_) => 504,
            _ => 500,
        }
    }

    /// True for errors caused by the caller rather than the system.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code())
    }
}

/// Error body returned to API consumers: `{code, message}`.
///
/// Server-side failures carry a generic message; the detailed error only
/// goes to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        let message = match err {
            Error::InvalidArgument(msg) => msg.clone(),
            Error::Cancelled => "request cancelled".to_string(),
            Error::DeadlineExceeded(_) => "request timed out".to_string(),
            _ => "internal server error".to_string(),
        };
        Self {
            code: err.code(),
            message,
        }
    }
}

/// Result type alias for usagerank-core
pub type Result<T> = std::result::Result<T, Error>;
