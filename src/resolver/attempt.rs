//! Single-request pipeline: one attempt at one logical key.
//!
//! Runs on its own task. Produces an [`Exchange`]; never touches the
//! context (the main resolution task merges results between passes).

use super::{finish_projection, protect, protect_value, Exchange, TransportFailure};
use crate::cache::{CacheBackend, CacheEntry, CacheKey};
use crate::clock;
use crate::events::{Event, EventSink, FailureReason};
use crate::http::{Request, Response};
use crate::spec::{AttemptView, CacheDecision, ParamMap, RequestSpec, RetryDecision};
use crate::transport::Transport;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct AttemptInput {
    pub key: String,
    pub spec: Arc<RequestSpec>,
    /// Params selected from the context, keyed by dotted name.
    pub params: ParamMap,
    /// 1-based attempt number for this key.
    pub num_attempts: u32,
    /// Pre-attempt delay from the previous attempt's retry decision.
    pub delay: Option<u64>,
    pub transport: Arc<dyn Transport>,
    pub cache: Option<Arc<dyn CacheBackend>>,
    pub sink: EventSink,
}

pub(crate) async fn run_attempt(input: AttemptInput) -> Exchange {
    let AttemptInput {
        key,
        spec,
        params,
        num_attempts,
        delay,
        transport,
        cache,
        sink,
    } = input;

    if let Some(ms) = delay {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
    let started_at = clock::now_millis();

    let bail = |started_at: i64| Exchange {
        path: key.clone(),
        req: None,
        res: None,
        error: None,
        success: false,
        retry: None,
        cache: None,
        started_at,
        completed_at: clock::now_millis(),
    };

    // 1. Compute the request descriptor.
    let req = match (&spec.req_fn, &spec.req) {
        (Some(f), _) => {
            let f = f.clone();
            let input = params.clone();
            match protect(&sink, "req-fn", move || f(&input)).await {
                Some(req) => req,
                None => return bail(started_at),
            }
        }
        (None, Some(req)) => req.clone(),
        (None, None) => return bail(started_at),
    };

    sink.emit(Event::Request {
        path: key.clone(),
        req: req.clone(),
    })
    .await;

    // 2. Transport. Error statuses are data; only connection-level
    // failures land in `error`.
    let (res, error) = match transport.execute(&req).await {
        Ok(res) => (Some(res), None),
        Err(e) => {
            let failure = TransportFailure {
                reason: FailureReason::from_transport(&e),
                message: e.to_string(),
            };
            sink.emit(Event::Exception {
                source: "transport".into(),
                message: failure.message.clone(),
            })
            .await;
            (None, Some(failure))
        }
    };

    // 3. Success predicate (protected; default 2xx).
    let success = match &res {
        Some(response) => match &spec.success {
            Some(f) => {
                let f = f.clone();
                let r = req.clone();
                let rs = response.clone();
                protect_value(&sink, "success-fn", move || f(&r, &rs))
                    .await
                    .unwrap_or(false)
            }
            None => response.is_success_status(),
        },
        None => false,
    };

    // 4. Policy decisions.
    let mut cache_decision: Option<CacheDecision> = None;
    let mut retry_decision: Option<RetryDecision> = None;
    if success {
        if let (Some(f), Some(response)) = (&spec.cache_fn, &res) {
            let f = f.clone();
            let r = req.clone();
            let rs = response.clone();
            if let Some(decision) =
                protect_value(&sink, "cache-fn", move || f(&r, &rs)).await.flatten()
            {
                match validate_cache_decision(&decision) {
                    Ok(()) => cache_decision = Some(decision),
                    Err(detail) => {
                        emit_invalid(&sink, &key, &decision, detail).await;
                    }
                }
            }
        }
    } else if let Some(f) = &spec.retry_fn {
        let view = AttemptView {
            req: &req,
            res: res.as_ref(),
            num_attempts,
        };
        if let Some(decision) = protect_value(&sink, "retry-fn", move || f(&view))
            .await
            .flatten()
        {
            match validate_retry_decision(&decision) {
                Ok(()) => retry_decision = Some(decision),
                Err(detail) => {
                    emit_invalid(&sink, &key, &decision, detail).await;
                }
            }
        }
    }

    // 5. Response event (the exception event was already emitted above).
    if let Some(response) = &res {
        sink.emit(Event::Response {
            path: key.clone(),
            req: req.clone(),
            res: response.clone(),
            success,
            retry: retry_decision.clone(),
            cache: cache_decision.clone(),
        })
        .await;
    }

    // 6. Cache write.
    if success {
        if let (Some(cache), Some(decision), Some(response)) = (&cache, &cache_decision, &res) {
            if decision.cache {
                store_in_cache(&key, &spec, &req, response, decision, cache, &params, &sink)
                    .await;
            }
        }
    }

    Exchange {
        path: key,
        req: Some(req),
        res,
        error,
        success,
        retry: retry_decision,
        cache: cache_decision,
        started_at,
        completed_at: clock::now_millis(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn store_in_cache(
    key: &str,
    spec: &RequestSpec,
    req: &Request,
    res: &Response,
    decision: &CacheDecision,
    cache: &Arc<dyn CacheBackend>,
    params: &ParamMap,
    sink: &EventSink,
) {
    let now = clock::now_millis();
    let expires_at = decision.expires_at.or_else(|| decision.ttl.map(|t| now + t));
    let entry = CacheEntry::new(Some(req.clone()), res, now, expires_at);

    let mut lookup_map = ParamMap::new();
    for r in spec.lookup_param_refs() {
        if let Some(v) = params.get(&r.dotted()) {
            lookup_map.insert(r.dotted(), v.clone());
        }
    }
    let projection = finish_projection(spec, lookup_map, sink).await;
    let cache_key = CacheKey::spec(spec.cache_id(), projection);

    match cache.put(&cache_key, entry).await {
        Ok(metadata) => {
            tracing::debug!(path = %key, backend = cache.name(), "stored in cache");
            sink.emit(Event::StoreInCache {
                path: key.to_string(),
                req: req.clone(),
                res: res.without_handle(),
                cached_at: now,
                expires_at,
                metadata,
            })
            .await;
        }
        Err(e) => {
            tracing::warn!(path = %key, error = %e, "cache put failed");
            sink.emit(Event::Exception {
                source: "cache/put".into(),
                message: e.to_string(),
            })
            .await;
        }
    }
}

async fn emit_invalid<D: serde::Serialize>(sink: &EventSink, key: &str, decision: &D, detail: String) {
    sink.emit(Event::InvalidData {
        path: key.to_string(),
        decision: serde_json::to_value(decision).unwrap_or(Value::Null),
        detail,
    })
    .await;
}

/// Shape is fixed by the types; what remains is semantic validity.
fn validate_cache_decision(decision: &CacheDecision) -> Result<(), String> {
    if decision.cache && decision.expires_at.is_none() && decision.ttl.is_none() {
        return Err("cache decision carries neither expires_at nor ttl".into());
    }
    if matches!(decision.ttl, Some(ttl) if ttl < 0) {
        return Err("negative ttl".into());
    }
    if matches!(decision.expires_at, Some(t) if t < 0) {
        return Err("negative expires_at".into());
    }
    Ok(())
}

fn validate_retry_decision(decision: &RetryDecision) -> Result<(), String> {
    if decision.retry && decision.max_retries == Some(0) {
        return Err("retry requested with max_retries 0".into());
    }
    Ok(())
}
