//! Process-wide responder registry.
//!
//! The registry is the one piece of global mutable state in the crate. It
//! maps `(method, url)` to responder closures so tests (and embedders) can
//! substitute fake transports without threading a transport instance through
//! every call site. Lookup is thread-safe; the default entry falls back to
//! the real [`HttpTransport`].

use super::{HttpTransport, Transport, TransportError};
use crate::http::{Method, Request, Response};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// A registered fake responder for one `(method, url)` pair.
pub type Responder = Arc<dyn Fn(&Request) -> Result<Response, TransportError> + Send + Sync>;

type ResponderMap = HashMap<(Method, String), Responder>;

static RESPONDERS: OnceLock<RwLock<ResponderMap>> = OnceLock::new();

fn responders() -> &'static RwLock<ResponderMap> {
    RESPONDERS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a responder for an exact `(method, url)` pair. Replaces any
/// previous responder for that pair.
pub fn register_responder<F>(method: Method, url: impl Into<String>, responder: F)
where
    F: Fn(&Request) -> Result<Response, TransportError> + Send + Sync + 'static,
{
    if let Ok(mut map) = responders().write() {
        map.insert((method, url.into()), Arc::new(responder));
    }
}

/// Drop every registered responder.
pub fn clear_responders() {
    if let Ok(mut map) = responders().write() {
        map.clear();
    }
}

fn responder_for(method: Method, url: &str) -> Option<Responder> {
    responders()
        .read()
        .ok()
        .and_then(|map| map.get(&(method, url.to_string())).cloned())
}

/// Default transport: registry lookup first, real HTTP otherwise.
pub struct RegistryTransport {
    fallback: HttpTransport,
}

impl RegistryTransport {
    pub fn new() -> crate::Result<Self> {
        Ok(Self {
            fallback: HttpTransport::new()?,
        })
    }
}

#[async_trait]
impl Transport for RegistryTransport {
    async fn execute(&self, req: &Request) -> Result<Response, TransportError> {
        if let Some(responder) = responder_for(req.method, &req.url) {
            return responder(req);
        }
        self.fallback.execute(req).await
    }
}
