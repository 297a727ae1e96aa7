//! Shared fixtures: a scripted stub transport and event helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqflow::{Event, Request, Response, Transport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Transport fake with scripted responses per URL. Responses are consumed
/// in order; the last one repeats. URLs without a script raise
/// `UnknownHost`, and every executed request is recorded for assertions.
#[derive(Default)]
pub struct StubTransport {
    scripts: Mutex<HashMap<String, VecDeque<Response>>>,
    seen: Mutex<Vec<Request>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, url: &str, responses: Vec<Response>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
        self
    }

    pub fn seen(&self) -> Vec<Request> {
        self.seen.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<Request> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn execute(&self, req: &Request) -> Result<Response, TransportError> {
        self.seen.lock().unwrap().push(req.clone());
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&req.url) {
            Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap()),
            Some(queue) => queue
                .front()
                .cloned()
                .ok_or_else(|| TransportError::Other(format!("script exhausted for {}", req.url))),
            None => Err(TransportError::UnknownHost(format!(
                "no script for {}",
                req.url
            ))),
        }
    }
}

pub fn kind(event: &Event) -> &'static str {
    match event {
        Event::Request { .. } => "request",
        Event::Response { .. } => "response",
        Event::CacheHit { .. } => "cache-hit",
        Event::StoreInCache { .. } => "store-in-cache",
        Event::Exception { .. } => "exception",
        Event::InvalidData { .. } => "invalid-data",
        Event::Failed { .. } => "failed",
    }
}

pub fn kinds(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(kind).collect()
}

pub async fn collect<S: Stream<Item = Event> + Unpin>(mut stream: S) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}
