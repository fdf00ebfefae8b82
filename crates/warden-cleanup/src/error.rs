//! # Design
//!
//! - Provide structured, constant-message errors for the cleanup pipeline.
//! - Capture operation context (paths, fields) to make failures reproducible in tests.

use thiserror::Error;

/// Result type for cleanup operations.
pub type CleanupResult<T> = Result<T, CleanupError>;

/// Errors produced by the cleanup predicates and walker.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// A configured pattern failed to compile as a case-insensitive regex.
    #[error("invalid cleanup pattern")]
    InvalidPattern {
        /// The list the pattern was drawn from (`file_patterns`, `folder_patterns`, `disable_file_patterns`).
        list: &'static str,
        /// The offending pattern text.
        pattern: String,
        /// Underlying regex compilation error.
        #[source]
        source: regex::Error,
    },
}
