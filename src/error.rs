use std::time::Duration;

use thiserror::Error;

/// A `Result` typedef to use with the [`FetchError`] type
pub type Result<T> = std::result::Result<T, FetchError>;

/// A boxed error used for transport-originated failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type for every fallible operation of this crate
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FetchError {
    /// A malformed method, URL, or query object was passed by the caller
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The transport failed: DNS, TLS, connection reset, protocol error
    #[error("network error: {0}")]
    Network(#[source] BoxError),
    /// The request did not complete within its timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The response body is not valid UTF-8
    #[error("body is not valid UTF-8")]
    Decode(#[from] std::str::Utf8Error),
    /// The response body is not valid JSON
    #[error("body is not valid JSON")]
    Parse(#[from] serde_json::Error),
    /// The redirect chain exceeded the configured limit
    #[error("redirect limit of {0} exceeded")]
    TooManyRedirects(usize),
    /// A top-level operation was invoked before a default context was installed
    #[error("no default context installed; call `install_default` with a connector first")]
    NoDefaultContext,
}

impl FetchError {
    /// Wraps any error as a [`FetchError::Network`]
    pub fn network<E: Into<BoxError>>(err: E) -> Self {
        Self::Network(err.into())
    }

    /// Returns `true` if this error is a request timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
