//! Unified error type for the crate.
//!
//! Resolution *failures* (retries exhausted, missing params, transport
//! categories) are data, not errors: they surface as `failed` events and in
//! the final [`Outcome`](crate::Outcome). The [`Error`] type here covers the
//! operational layer - transport construction, cache backend I/O,
//! serialization, and user-function failures that the resolver swallows and
//! reports as `exception` events.

use crate::transport::TransportError;
use thiserror::Error;

/// Result type alias for the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("cache backend error: {0}")]
    Cache(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    UserFn(String),
}

impl Error {
    /// Create a cache backend error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Error::Cache(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create an error from inside a user-supplied function (`req_fn`,
    /// `retry_fn`, …). The resolver catches these and emits an `exception`
    /// event instead of propagating.
    pub fn user(msg: impl Into<String>) -> Self {
        Error::UserFn(msg.into())
    }
}
