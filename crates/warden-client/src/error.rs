//! Error types internal to the remote-client crate. These never cross
//! the public API boundary — every public operation returns a
//! [`crate::RemoteOutcome`] instead (§4.2).

use thiserror::Error;

/// Configuration or construction errors for [`crate::QbitClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configured host/port did not form a valid URL.
    #[error("invalid remote engine base url: {0}")]
    InvalidBaseUrl(String),
    /// Building the underlying HTTP client failed.
    #[error("failed to build http client")]
    Build(#[source] reqwest::Error),
}
