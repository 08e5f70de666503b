//! Error types for the Toolgate admission layer.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ratelimit::BlockedReason;
use crate::ratelimit::StoreError;

/// Main error type for Toolgate operations.
#[derive(Error, Debug)]
pub enum ToolgateError {
    /// Configuration-related errors, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller is over budget; recoverable by waiting until `reset_at`
    #[error("Rate limit exceeded, retry after {reset_at}")]
    RateLimitExceeded {
        limit: u64,
        reset_at: DateTime<Utc>,
        reason: BlockedReason,
    },

    /// Counter store failures surfaced only by administrative operations;
    /// request-path checks absorb these through the degradation policy
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Toolgate operations.
pub type Result<T> = std::result::Result<T, ToolgateError>;
