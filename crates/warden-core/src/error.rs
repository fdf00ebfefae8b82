//! Error types shared by the domain model.

use thiserror::Error;

/// Errors surfaced while parsing or validating domain values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A torrent hash did not look like a 40-character hex SHA-1 digest.
    #[error("invalid torrent hash")]
    InvalidHash {
        /// The offending value.
        value: String,
    },
    /// A task type string did not match a recognized variant.
    #[error("invalid task type")]
    InvalidTaskType {
        /// The offending value.
        value: String,
    },
    /// A task status string did not match a recognized variant.
    #[error("invalid task status")]
    InvalidTaskStatus {
        /// The offending value.
        value: String,
    },
    /// A breaker state string did not match a recognized variant.
    #[error("invalid breaker state")]
    InvalidBreakerState {
        /// The offending value.
        value: String,
    },
}

/// Convenience alias for domain-model results.
pub type CoreResult<T> = Result<T, CoreError>;
