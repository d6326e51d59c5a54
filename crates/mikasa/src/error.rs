//! Session engine error types.

use serde_json::Value;
use thiserror::Error;

/// Session engine error type.
///
/// Cloneable so the engine can keep the last failure as its current error
/// while also handing it back to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Rejection carrying an HTTP-like status code
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: Value },

    /// The request never produced a response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request timed out
    #[error("Operation timed out")]
    Timeout,

    /// A strategy hook failed
    #[error("Strategy error: {0}")]
    Strategy(String),

    /// A strategy does not implement the hook the engine called
    #[error("Strategy does not implement {0}")]
    MissingHook(&'static str),

    /// No strategy is active
    #[error("No active strategy")]
    NoStrategy,

    /// Strategy name is not registered
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Secondary recovery needs a cached user
    #[error("No user available for credential recovery")]
    MissingUser,

    /// Refresh protocol started without a refresh token
    #[error("No refresh token for strategy {0}")]
    MissingRefreshToken(String),

    /// Strategy has no token endpoint configured
    #[error("No token endpoint configured for strategy {0}")]
    MissingTokenEndpoint(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// HTTP-like status code, when the failure carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Transport failures (connection refused, reset, DNS)
    /// - Timeouts
    /// - HTTP errors with 5xx status codes
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Transport(_) | AuthError::Timeout => true,
            AuthError::Http { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Json(e.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(e: url::ParseError) -> Self {
        AuthError::InvalidUrl(e.to_string())
    }
}

impl From<universal_storage::StorageError> for AuthError {
    fn from(e: universal_storage::StorageError) -> Self {
        AuthError::Storage(e.to_string())
    }
}

impl From<auth_config_and_utils::CoreError> for AuthError {
    fn from(e: auth_config_and_utils::CoreError) -> Self {
        AuthError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AuthError::Timeout
        } else if let Some(status) = e.status() {
            AuthError::Http {
                status: status.as_u16(),
                body: Value::Null,
            }
        } else {
            AuthError::Transport(e.to_string())
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
