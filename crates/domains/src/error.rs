//! # AppError
//!
//! Centralized error handling for the messaging core.
//! Maps domain-specific failures to actionable error types.

use std::time::Duration;

use thiserror::Error;

/// The primary error type for all domain and service operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// No valid identity credential was presented.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The caller is not a participant of the conversation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Resource not found (e.g., Conversation, Listing)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., empty message, malformed id)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A buyer tried to open a conversation on their own listing.
    #[error("cannot start a conversation with yourself")]
    SelfConversation,

    /// The listing has no resolvable seller. Data-integrity problem, not retryable.
    #[error("listing {0} has no resolvable owner")]
    NoOwner(String),

    /// Sender exceeded the send window. Transient.
    #[error("too many requests, retry after {}s", retry_after_secs(*retry_after))]
    RateLimitExceeded { retry_after: Duration },

    /// Resource already exists
    #[error("conflict: {0}")]
    Conflict(String),

    /// Infrastructure failure (e.g., DB down, Redis timeout)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        AppError::NotFound(entity.to_owned(), id.to_string())
    }

    /// Whether the caller may retry the same request after a short delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RateLimitExceeded { .. })
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(format!("{e:#}"))
    }
}

/// Whole seconds a throttled caller should wait: rounded up, never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/// A specialized Result type for Rusty-Estate logic.
pub type Result<T> = std::result::Result<T, AppError>;
