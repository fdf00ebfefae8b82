//! Error types for the task store.

use thiserror::Error;

/// Errors raised by the durable task store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Applying embedded migrations failed.
    #[error("failed to run store migrations")]
    Migration(#[source] sqlx::migrate::MigrateError),
    /// A database operation failed after the one allowed busy-retry.
    #[error("store query failed: {operation}")]
    Query {
        /// Identifies which operation failed, for logging.
        operation: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },
    /// A stored `task_type`, `status`, or `breaker_type` value did not
    /// parse back into a domain enum.
    #[error("corrupt store row")]
    Corrupt(#[source] warden_core::CoreError),
    /// The breaker config blob failed to deserialize.
    #[error("corrupt breaker config")]
    CorruptConfig(#[source] serde_json::Error),
}

impl From<warden_core::CoreError> for StoreError {
    fn from(source: warden_core::CoreError) -> Self {
        Self::Corrupt(source)
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_error_displays_operation_name() {
        let err = StoreError::Query {
            operation: "claim_pending",
            source: sqlx::Error::RowNotFound,
        };
        assert_eq!(err.to_string(), "store query failed: claim_pending");
    }
}
