//! Error types for the Turnstile rate limiter.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Turnstile operations outside the check path.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TurnstileError {
    fn from(e: config::ConfigError) -> Self {
        TurnstileError::Config(e.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;

/// The single error a caller of a rate limit check has to handle.
///
/// Denials carry `retry_after_seconds` so the caller can tell the end user
/// how long to back off. Store outages on fail-closed scopes carry no hint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RateLimitError {
    /// Human-readable message, safe to show to end users
    pub message: String,
    /// Seconds the caller should wait before retrying, when known
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitError {
    /// The bucket is empty or a lockout is in effect.
    pub fn exhausted(retry_after_seconds: u64) -> Self {
        Self {
            message: format!(
                "Too many attempts. Please try again in {} seconds.",
                retry_after_seconds
            ),
            retry_after_seconds: Some(retry_after_seconds),
        }
    }

    /// The check itself could not be completed.
    pub fn unavailable() -> Self {
        Self {
            message: "Verification failed. Please try again later.".to_string(),
            retry_after_seconds: None,
        }
    }
}
