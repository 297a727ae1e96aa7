//! Resolution lifecycle events.
//!
//! The resolver narrates every step - requests issued, responses, cache
//! traffic, swallowed exceptions, terminal failures - onto a bounded,
//! ordered event stream. The stream is closed exactly once, by the
//! resolver, when the main loop terminates.

use crate::http::{Request, Response};
use crate::spec::{CacheDecision, RetryDecision};
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Default bound of the event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 512;

/// Why a pending key was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    MissingParams,
    RetriesExhausted,
    RequestFailed,
    UnknownHost,
    ConnectionRefused,
    ConnectionTimeout,
    SocketTimeout,
    MissingReqOrReqFn,
    Unknown,
}

impl FailureReason {
    pub(crate) fn from_transport(err: &TransportError) -> FailureReason {
        match err {
            TransportError::UnknownHost(_) => FailureReason::UnknownHost,
            TransportError::ConnectionRefused(_) => FailureReason::ConnectionRefused,
            TransportError::ConnectTimeout(_) => FailureReason::ConnectionTimeout,
            TransportError::SocketTimeout(_) => FailureReason::SocketTimeout,
            TransportError::Http(_) | TransportError::Other(_) => FailureReason::Unknown,
        }
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    /// A request is about to be issued for `path`.
    Request { path: String, req: Request },

    /// An attempt completed with a response (success or not), along with
    /// the policy decisions attached to the exchange.
    Response {
        path: String,
        req: Request,
        res: Response,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry: Option<RetryDecision>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache: Option<CacheDecision>,
    },

    /// A pending key was satisfied from the cache.
    CacheHit {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        req: Option<Request>,
        res: Response,
        cached_at: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<i64>,
        metadata: Value,
    },

    /// A successful exchange was written to the cache.
    StoreInCache {
        path: String,
        req: Request,
        res: Response,
        cached_at: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<i64>,
        metadata: Value,
    },

    /// A protected call failed (user function, cache backend, transport);
    /// resolution continued with a safe default.
    Exception { source: String, message: String },

    /// A policy function returned a semantically invalid decision; the
    /// decision was dropped.
    InvalidData {
        path: String,
        decision: Value,
        detail: String,
    },

    /// A pending key could not be resolved.
    Failed {
        path: String,
        reason: FailureReason,
        data: Value,
    },
}

impl Event {
    /// The key this event belongs to, when it has one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Event::Request { path, .. }
            | Event::Response { path, .. }
            | Event::CacheHit { path, .. }
            | Event::StoreInCache { path, .. }
            | Event::InvalidData { path, .. }
            | Event::Failed { path, .. } => Some(path),
            Event::Exception { .. } => None,
        }
    }
}

/// Producer half of the event stream. Cloned into each in-flight
/// sub-request task; `emit` awaits channel capacity, so a slow consumer
/// back-pressures the resolver. The channel closes when the resolver drops
/// its last clone.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<Event>,
}

impl EventSink {
    pub(crate) fn channel(buffer: usize) -> (EventSink, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (EventSink { tx }, rx)
    }

    pub(crate) async fn emit(&self, event: Event) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("event receiver dropped; discarding event");
        }
    }
}
