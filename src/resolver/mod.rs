//! The request-resolution engine.
//!
//! A resolution drives a set of named target keys to completion. Each step
//! tries three strategies in strict order - cache-lookup pass, dispatch
//! pass, expansion pass - and the first one that makes progress wins the
//! step. When none applies, every still-pending key gets a synthesized
//! `failed` event and the event stream closes.
//!
//! The context and specs table are mutated only by the main resolution task
//! between passes; in-flight sub-requests produce exchanges, never write
//! the context.

mod attempt;

pub(crate) use attempt::{run_attempt, AttemptInput};

use crate::cache::{CacheBackend, CacheKey};
use crate::clock;
use crate::events::{Event, EventSink, FailureReason};
use crate::http::{Request, Response};
use crate::spec::{
    CacheDecision, ParamMap, ParamRef, ParamValue, Params, RequestSpec, RetryDecision, SelectFn,
};
use crate::transport::Transport;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// One attempt at one logical key.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req: Option<Request>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub res: Option<Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TransportFailure>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheDecision>,
    pub started_at: i64,
    pub completed_at: i64,
}

/// Serializable form of a transport error captured on an exchange.
#[derive(Debug, Clone, Serialize)]
pub struct TransportFailure {
    pub reason: FailureReason,
    pub message: String,
}

pub(crate) struct Resolver {
    specs: HashMap<String, Arc<RequestSpec>>,
    selects: HashMap<String, Arc<SelectFn>>,
    ctx: ParamMap,
    pending: Vec<String>,
    refreshing: HashSet<String>,
    exchanges: Vec<Exchange>,
    cache: Option<Arc<dyn CacheBackend>>,
    transport: Arc<dyn Transport>,
    sink: EventSink,
}

impl Resolver {
    pub(crate) fn new(
        targets: Vec<(String, RequestSpec)>,
        params: Params,
        cache: Option<Arc<dyn CacheBackend>>,
        transport: Arc<dyn Transport>,
        sink: EventSink,
    ) -> Self {
        let mut specs: HashMap<String, Arc<RequestSpec>> = HashMap::new();
        let mut selects: HashMap<String, Arc<SelectFn>> = HashMap::new();
        let mut ctx = ParamMap::new();
        let mut pending = Vec::new();

        for (key, spec) in targets {
            specs.insert(key.clone(), Arc::new(spec));
            pending.push(key);
        }

        // Seed the context; sub-request params are lifted into the specs
        // table with their projection.
        for (name, value) in params.entries {
            match value {
                ParamValue::Value(v) => {
                    ctx.insert(name, v);
                }
                ParamValue::Spec(sub) => {
                    specs.insert(name.clone(), Arc::new(sub.spec));
                    if let Some(select) = sub.select {
                        selects.insert(name, select);
                    }
                }
            }
        }

        Resolver {
            specs,
            selects,
            ctx,
            pending,
            refreshing: HashSet::new(),
            exchanges: Vec::new(),
            cache,
            transport,
            sink,
        }
    }

    /// Drive every pending key to resolution. The event sink closes when
    /// this returns (the resolver holds the last senders).
    pub(crate) async fn run(mut self) -> Vec<Exchange> {
        loop {
            if self.pending.is_empty() {
                break;
            }
            if self.cache_pass().await {
                continue;
            }
            if self.dispatch_pass().await {
                continue;
            }
            if self.expand_pass() {
                continue;
            }
            break;
        }
        self.fail_pending().await;
        self.exchanges
    }

    fn fetch_param(&self, param: &ParamRef) -> Option<Value> {
        let root = self.ctx.get(param.root())?;
        if param.segments().len() == 1 {
            Some(root.clone())
        } else {
            crate::utils::path::get_in(root, &param.segments()[1..]).cloned()
        }
    }

    /// Param map for `refs`, or `None` when any of them is unrealized.
    fn params_map(&self, refs: &[ParamRef]) -> Option<ParamMap> {
        let mut map = ParamMap::new();
        for r in refs {
            map.insert(r.dotted(), self.fetch_param(r)?);
        }
        Some(map)
    }

    /// Lookup-param projection for cache keying. Outer `None`: lookup
    /// params unrealized (no cache consultation). Inner `None`: empty
    /// projection.
    async fn lookup_projection(&self, spec: &RequestSpec) -> Option<Option<Value>> {
        let map = self.params_map(spec.lookup_param_refs())?;
        Some(finish_projection(spec, map, &self.sink).await)
    }

    async fn project(&self, key: &str, res: &Response) -> Value {
        if let Some(select) = self.selects.get(key) {
            let select = select.clone();
            let res = res.clone();
            if let Some(v) = protect_value(&self.sink, "select-fn", move || select(&res)).await {
                return v;
            }
        }
        serde_json::to_value(res).unwrap_or(Value::Null)
    }

    /// Strategy 1: satisfy pending keys from the cache. Keys marked for
    /// refresh are skipped; lookups never trigger resolution of non-lookup
    /// params.
    async fn cache_pass(&mut self) -> bool {
        let Some(cache) = self.cache.clone() else {
            return false;
        };
        let mut progress = false;
        for key in self.pending.clone() {
            if self.refreshing.contains(&key) {
                continue;
            }
            let Some(spec) = self.specs.get(&key).cloned() else {
                continue;
            };
            let Some(projection) = self.lookup_projection(&spec).await else {
                continue;
            };
            let cache_key = CacheKey::spec(spec.cache_id(), projection);
            match cache.lookup(&cache_key).await {
                Ok(Some(entry)) if !entry.is_expired(clock::now_millis()) => {
                    let value = self.project(&key, &entry.res).await;
                    self.ctx.insert(key.clone(), value);
                    self.pending.retain(|k| k != &key);
                    tracing::debug!(path = %key, backend = cache.name(), "cache hit");
                    self.sink
                        .emit(Event::CacheHit {
                            path: key.clone(),
                            req: entry.req.clone(),
                            res: entry.res.clone(),
                            cached_at: entry.cached_at,
                            expires_at: entry.expires_at,
                            metadata: json!({
                                "key": cache_key.to_value(),
                                "backend": cache.name(),
                            }),
                        })
                        .await;
                    progress = true;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %key, error = %e, "cache lookup failed");
                    self.sink
                        .emit(Event::Exception {
                            source: "cache/lookup".into(),
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }
        progress
    }

    /// Strategy 2: issue every eligible pending key concurrently and merge
    /// all results before the next pass.
    async fn dispatch_pass(&mut self) -> bool {
        let mut batch: Vec<AttemptInput> = Vec::new();
        for key in &self.pending {
            let Some(spec) = self.specs.get(key) else {
                continue;
            };
            if !spec.has_request_source() {
                continue;
            }
            let prior: Vec<&Exchange> = self.exchanges.iter().filter(|e| &e.path == key).collect();
            let attempts = prior.len() as u32;
            let mut delay = None;
            if let Some(last) = prior.last() {
                let eligible = match &last.retry {
                    Some(d) if d.retry => d.max_retries.map_or(true, |max| attempts <= max),
                    _ => false,
                };
                if !eligible {
                    continue;
                }
                delay = last.retry.as_ref().and_then(|d| d.delay);
            }
            let Some(params) = self.params_map(&spec.params) else {
                continue;
            };
            batch.push(AttemptInput {
                key: key.clone(),
                spec: spec.clone(),
                params,
                num_attempts: attempts + 1,
                delay,
                transport: self.transport.clone(),
                cache: self.cache.clone(),
                sink: self.sink.clone(),
            });
        }
        if batch.is_empty() {
            return false;
        }
        tracing::debug!(count = batch.len(), "dispatch pass");

        let handles: Vec<_> = batch
            .into_iter()
            .map(|input| tokio::spawn(run_attempt(input)))
            .collect();
        for handle in handles {
            match handle.await {
                Ok(exchange) => self.merge(exchange).await,
                Err(e) => {
                    self.sink
                        .emit(Event::Exception {
                            source: "resolver/attempt".into(),
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }
        true
    }

    async fn merge(&mut self, exchange: Exchange) {
        if exchange.success {
            if let Some(res) = &exchange.res {
                let value = self.project(&exchange.path, res).await;
                self.ctx.insert(exchange.path.clone(), value);
            }
            self.pending.retain(|k| k != &exchange.path);
            self.refreshing.remove(&exchange.path);
        } else if let Some(decision) = &exchange.retry {
            for key in &decision.refresh {
                self.ctx.remove(key);
                self.refreshing.insert(key.clone());
                if self.specs.contains_key(key) && !self.pending.iter().any(|k| k == key) {
                    self.pending.push(key.clone());
                }
            }
        }
        self.exchanges.push(exchange);
    }

    /// Strategy 3: pull dependency specs referenced by pending keys into
    /// the pending set.
    fn expand_pass(&mut self) -> bool {
        let mut added: Vec<String> = Vec::new();
        for key in &self.pending {
            let Some(spec) = self.specs.get(key) else {
                continue;
            };
            for param in &spec.params {
                let root = param.root();
                if !self.ctx.contains_key(root)
                    && self.specs.contains_key(root)
                    && !self.pending.iter().any(|k| k == root)
                    && !added.iter().any(|k| k == root)
                {
                    added.push(root.to_string());
                }
            }
        }
        if added.is_empty() {
            return false;
        }
        tracing::debug!(keys = ?added, "expansion pass");
        self.pending.extend(added);
        true
    }

    async fn fail_pending(&mut self) {
        for key in self.pending.clone() {
            let (reason, data) = self.classify(&key);
            tracing::debug!(path = %key, ?reason, "unresolvable key");
            self.sink
                .emit(Event::Failed {
                    path: key,
                    reason,
                    data,
                })
                .await;
        }
        self.pending.clear();
    }

    fn classify(&self, key: &str) -> (FailureReason, Value) {
        let Some(spec) = self.specs.get(key) else {
            return (FailureReason::Unknown, json!({}));
        };
        if !spec.has_request_source() {
            return (FailureReason::MissingReqOrReqFn, json!({}));
        }
        if let Some(exchange) = self.exchanges.iter().rev().find(|e| e.path == key) {
            if let Some(error) = &exchange.error {
                return (error.reason, json!({ "message": &error.message }));
            }
            if let Some(decision) = &exchange.retry {
                let attempts = self.exchanges.iter().filter(|e| e.path == key).count() as u32;
                if let Some(max) = decision.max_retries {
                    if attempts > max {
                        return (
                            FailureReason::RetriesExhausted,
                            json!({
                                "attempts": attempts,
                                "max_retries": max,
                                "req": &exchange.req,
                                "res": &exchange.res,
                            }),
                        );
                    }
                }
            }
            if exchange.res.is_some() {
                return (
                    FailureReason::RequestFailed,
                    json!({ "req": &exchange.req, "res": &exchange.res }),
                );
            }
            return (FailureReason::Unknown, json!({}));
        }
        let missing: Vec<String> = spec
            .params
            .iter()
            .filter(|p| self.fetch_param(p).is_none())
            .map(|p| p.dotted())
            .collect();
        if !missing.is_empty() {
            return (FailureReason::MissingParams, json!({ "missing": missing }));
        }
        (FailureReason::Unknown, json!({}))
    }
}

/// Apply `prepare_lookup_params` (protected) and collapse an empty
/// projection to `None`. Shared by the lookup pass and the put path.
pub(crate) async fn finish_projection(
    spec: &RequestSpec,
    mut map: ParamMap,
    sink: &EventSink,
) -> Option<Value> {
    if let Some(prepare) = &spec.prepare_lookup_params {
        let prepare = prepare.clone();
        let input = map.clone();
        if let Some(out) = protect_value(sink, "prepare-lookup-params", move || prepare(input)).await
        {
            map = out;
        }
    }
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

/// Run a fallible user function, converting panics and `Err`s into an
/// `exception` event and a `None` result.
pub(crate) async fn protect<T>(
    sink: &EventSink,
    source: &str,
    f: impl FnOnce() -> crate::Result<T>,
) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(source, error = %e, "user function failed");
            sink.emit(Event::Exception {
                source: source.into(),
                message: e.to_string(),
            })
            .await;
            None
        }
        Err(panic) => {
            let message = panic_message(&panic);
            tracing::warn!(source, message = %message, "user function panicked");
            sink.emit(Event::Exception {
                source: source.into(),
                message,
            })
            .await;
            None
        }
    }
}

/// [`protect`] for infallible-signature functions (they can still panic).
pub(crate) async fn protect_value<T>(
    sink: &EventSink,
    source: &str,
    f: impl FnOnce() -> T,
) -> Option<T> {
    protect(sink, source, || Ok(f())).await
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in user function".to_string()
    }
}
