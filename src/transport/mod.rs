//! HTTP transport: the single operation the resolver needs from the
//! network.
//!
//! A [`Transport`] turns a request descriptor into a response descriptor or
//! a [`TransportError`]. Non-2xx statuses are data, not errors - only
//! connection-level failures raise. The default transport
//! ([`RegistryTransport`]) consults a process-wide responder registry first
//! so tests can substitute fake responders per `(method, url)`, and falls
//! back to the real [`HttpTransport`].

mod http;
pub mod registry;

pub use http::HttpTransport;
pub use registry::{clear_responders, register_responder, RegistryTransport};

use crate::http::{Request, Response};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Connection-level failure categories. Mapped onto the resolution failure
/// taxonomy when a pending key is abandoned.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connection timeout: {0}")]
    ConnectTimeout(String),

    #[error("socket timeout: {0}")]
    SocketTimeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Classify a reqwest error into a transport category by inspecting the
    /// error and its source chain. Unclassifiable errors stay `Http`.
    pub(crate) fn classify(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            if err.is_connect() {
                return TransportError::ConnectTimeout(err.to_string());
            }
            return TransportError::SocketTimeout(err.to_string());
        }
        if err.is_connect() {
            let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
            while let Some(cause) = source {
                if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                    if io.kind() == std::io::ErrorKind::ConnectionRefused {
                        return TransportError::ConnectionRefused(err.to_string());
                    }
                }
                let text = cause.to_string().to_lowercase();
                if text.contains("dns error") || text.contains("failed to lookup address") {
                    return TransportError::UnknownHost(err.to_string());
                }
                source = cause.source();
            }
        }
        TransportError::Http(err)
    }
}

use std::error::Error as _;

/// Single-operation transport contract.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, req: &Request) -> Result<Response, TransportError>;
}

static DEFAULT_TRANSPORT: OnceLock<Arc<RegistryTransport>> = OnceLock::new();

/// The shared default transport: registry lookup with a real HTTP fallback.
/// Construction of the underlying client can fail; the shared instance is
/// built once and reused afterwards.
pub fn default_transport() -> crate::Result<Arc<dyn Transport>> {
    if let Some(t) = DEFAULT_TRANSPORT.get() {
        let t: Arc<dyn Transport> = t.clone();
        return Ok(t);
    }
    let transport = Arc::new(RegistryTransport::new()?);
    let _ = DEFAULT_TRANSPORT.set(transport.clone());
    let transport: Arc<dyn Transport> = transport;
    Ok(transport)
}
