//! Startup and runtime error types (§7): each component crate owns its
//! own `thiserror` enum; this crate's sole job is collapsing whatever
//! heterogeneous error came out of bootstrap into one of the exit
//! codes named in §6. `anyhow` does the collapsing; [`AppError`] only
//! tags *which* exit code applies.

/// Result alias for application bootstrap and supervisor operations.
pub type AppResult<T> = Result<T, AppError>;

/// Top-level failure of the supervisor, tagged with the exit code the
/// binary should report for it.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The configuration document could not be loaded or failed validation.
    #[error("configuration error: {source}")]
    Config {
        /// Underlying cause, collapsed from `warden_config::ConfigError`.
        #[source]
        source: anyhow::Error,
    },
    /// Some other part of startup could not be completed: opening the
    /// database, building the remote client, or compiling cleanup
    /// patterns.
    #[error("initialization error: {source}")]
    Init {
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// Process exit code for this failure (§6): `1` for configuration
    /// errors, `2` for any other unrecoverable initialization failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 1,
            Self::Init { .. } => 2,
        }
    }

    /// Wrap a configuration failure.
    pub fn config(source: impl Into<anyhow::Error>) -> Self {
        Self::Config {
            source: source.into(),
        }
    }

    /// Wrap an initialization failure.
    pub fn init(source: impl Into<anyhow::Error>) -> Self {
        Self::Init {
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_report_exit_code_one() {
        let err = AppError::config(anyhow::anyhow!("bad json"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn init_errors_report_exit_code_two() {
        let err = AppError::init(anyhow::anyhow!("db open failed"));
        assert_eq!(err.exit_code(), 2);
    }
}
