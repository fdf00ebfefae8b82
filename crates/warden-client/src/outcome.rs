//! The structured outcome vocabulary every remote call resolves to (§4.2).
//! Remote-client operations never throw across the crate boundary; a
//! transport exception becomes [`RemoteOutcome::NetworkError`], a
//! non-2xx response becomes [`RemoteOutcome::ApiError`], and an empty
//! result body becomes [`RemoteOutcome::NotFound`] where applicable.

/// Classified result of one call against the remote engine.
#[derive(Debug, Clone)]
pub enum RemoteOutcome<T> {
    /// The call succeeded and returned `T`.
    Ok(T),
    /// The remote engine has no record of the requested resource.
    NotFound,
    /// The remote engine responded with a non-2xx status.
    ApiError(String),
    /// The request failed at the transport level (timeout, connection
    /// refused, DNS failure, TLS failure, ...).
    NetworkError(String),
}

impl<T> RemoteOutcome<T> {
    /// `true` iff this is [`RemoteOutcome::Ok`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// `true` iff this is [`RemoteOutcome::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Map the success value, leaving other variants untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RemoteOutcome<U> {
        match self {
            Self::Ok(value) => RemoteOutcome::Ok(f(value)),
            Self::NotFound => RemoteOutcome::NotFound,
            Self::ApiError(msg) => RemoteOutcome::ApiError(msg),
            Self::NetworkError(msg) => RemoteOutcome::NetworkError(msg),
        }
    }
}
