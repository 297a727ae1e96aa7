//! Public entry points.
//!
//! Developer-friendly goal: keep the surface small and predictable.
//! [`request`] drives a single spec to completion and returns the
//! assembled [`Outcome`]; [`request_with_log`] additionally exposes the
//! live event stream; [`make_requests`] is the lower-level entry point
//! resolving multiple named targets.

use crate::cache::CacheBackend;
use crate::events::{Event, EventSink, DEFAULT_EVENT_BUFFER};
use crate::outcome::Outcome;
use crate::resolver::Resolver;
use crate::spec::{Params, RequestSpec};
use crate::transport::Transport;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};

/// Key under which a single root spec is resolved.
pub const ROOT_KEY: &str = "root";

/// Per-resolution options.
#[derive(Clone)]
pub struct RequestOptions {
    /// Cache backend, or `None` to resolve without caching.
    pub cache: Option<Arc<dyn CacheBackend>>,
    /// Initial param values, including nested sub-specs.
    pub params: Params,
    /// Transport override; defaults to the registry-backed HTTP transport.
    pub transport: Option<Arc<dyn Transport>>,
    /// Bound of the event channel.
    pub event_buffer: usize,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            cache: None,
            params: Params::new(),
            transport: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer;
        self
    }
}

/// Resolve multiple named targets, returning the live event stream. The
/// caller collects events to form a result; the stream ends when the
/// resolution completes.
///
/// Must be called from within a tokio runtime.
pub fn make_requests(
    options: RequestOptions,
    targets: Vec<(String, RequestSpec)>,
) -> crate::Result<ReceiverStream<Event>> {
    let RequestOptions {
        cache,
        params,
        transport,
        event_buffer,
    } = options;
    let transport = match transport {
        Some(t) => t,
        None => crate::transport::default_transport()?,
    };
    let (sink, rx) = EventSink::channel(event_buffer);
    let resolver = Resolver::new(targets, params, cache, transport, sink);
    tokio::spawn(async move {
        resolver.run().await;
    });
    Ok(ReceiverStream::new(rx))
}

/// Drive `spec` to completion and assemble the result.
pub async fn request(spec: RequestSpec, options: RequestOptions) -> crate::Result<Outcome> {
    let supplied: HashSet<String> = options.params.names().map(str::to_string).collect();
    let mut stream = make_requests(options, vec![(ROOT_KEY.to_string(), spec)])?;
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    Ok(Outcome::assemble(ROOT_KEY, &supplied, &events))
}

/// Like [`request`], but also exposes the live event stream. The returned
/// handle resolves with the final [`Outcome`]. The forwarded stream is
/// unbounded so an inattentive consumer cannot stall the resolution; the
/// resolver's own sink stays bounded.
pub fn request_with_log(
    spec: RequestSpec,
    options: RequestOptions,
) -> crate::Result<(UnboundedReceiverStream<Event>, JoinHandle<Outcome>)> {
    let supplied: HashSet<String> = options.params.names().map(str::to_string).collect();
    let mut stream = make_requests(options, vec![(ROOT_KEY.to_string(), spec)])?;
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            let _ = tx.send(event.clone());
            events.push(event);
        }
        Outcome::assemble(ROOT_KEY, &supplied, &events)
    });
    Ok((UnboundedReceiverStream::new(rx), handle))
}
