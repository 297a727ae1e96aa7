//! Retry and cache policy builders.
//!
//! Small configs that close over into `retry_fn` / `cache_fn` closures, so
//! common policies don't need hand-written decision functions. Prefer
//! deterministic, explainable behavior over clever heuristics.

use crate::clock;
use crate::http::{Method, Request, Response};
use crate::spec::{AttemptView, CacheDecision, CacheFn, RetryDecision, RetryFn};
use std::sync::Arc;

/// Config for a `retry_fn`: retry up to `retries` times with per-attempt
/// delays, optionally refreshing dependency keys before the next attempt.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    retries: u32,
    delays: Vec<u64>,
    retryable: Option<Arc<dyn Fn(&AttemptView<'_>) -> bool + Send + Sync>>,
    refresh: Vec<String>,
    refresh_fn: Option<Arc<dyn Fn(&AttemptView<'_>) -> Vec<String> + Send + Sync>>,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        RetryPolicy {
            retries,
            ..RetryPolicy::default()
        }
    }

    /// Delay (ms) before attempt N+1; the last entry repeats for later
    /// attempts.
    pub fn with_delays<I: IntoIterator<Item = u64>>(mut self, delays: I) -> Self {
        self.delays = delays.into_iter().collect();
        self
    }

    /// Predicate gating the whole policy. Default: request method is GET.
    pub fn with_retryable<F>(mut self, f: F) -> Self
    where
        F: Fn(&AttemptView<'_>) -> bool + Send + Sync + 'static,
    {
        self.retryable = Some(Arc::new(f));
        self
    }

    /// Keys to refresh (cache bypassed, re-resolved) before every retry.
    pub fn with_refresh<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refresh = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Computed refresh set, e.g. refresh the token key only on 401.
    pub fn with_refresh_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&AttemptView<'_>) -> Vec<String> + Send + Sync + 'static,
    {
        self.refresh_fn = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Arc<RetryFn> {
        Arc::new(move |attempt| {
            let retryable = match &self.retryable {
                Some(f) => f(attempt),
                None => attempt.req.method == Method::Get,
            };
            if !retryable {
                return None;
            }
            let delay = if self.delays.is_empty() {
                None
            } else {
                let idx = (attempt.num_attempts.max(1) as usize).min(self.delays.len()) - 1;
                Some(self.delays[idx])
            };
            let refresh = match &self.refresh_fn {
                Some(f) => f(attempt),
                None => self.refresh.clone(),
            };
            Some(RetryDecision {
                retry: attempt.num_attempts <= self.retries,
                delay,
                max_retries: Some(self.retries),
                refresh,
            })
        })
    }
}

/// Config for a `cache_fn`: cache successful exchanges for `ttl`
/// milliseconds.
#[derive(Clone, Default)]
pub struct CachePolicy {
    ttl: Option<i64>,
    ttl_fn: Option<Arc<dyn Fn(&Request, &Response) -> i64 + Send + Sync>>,
    cacheable: Option<Arc<dyn Fn(&Request, &Response) -> bool + Send + Sync>>,
}

impl CachePolicy {
    pub fn with_ttl(ttl: i64) -> Self {
        CachePolicy {
            ttl: Some(ttl),
            ..CachePolicy::default()
        }
    }

    pub fn with_ttl_fn<F>(f: F) -> Self
    where
        F: Fn(&Request, &Response) -> i64 + Send + Sync + 'static,
    {
        CachePolicy {
            ttl_fn: Some(Arc::new(f)),
            ..CachePolicy::default()
        }
    }

    /// Predicate gating the policy. Default: request method is GET (POST
    /// responses are not cached unless a caller opts in).
    pub fn cacheable<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request, &Response) -> bool + Send + Sync + 'static,
    {
        self.cacheable = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Arc<CacheFn> {
        Arc::new(move |req, res| {
            let cacheable = match &self.cacheable {
                Some(f) => f(req, res),
                None => req.method == Method::Get,
            };
            if !cacheable {
                return None;
            }
            let ttl = match &self.ttl_fn {
                Some(f) => f(req, res),
                None => self.ttl?,
            };
            Some(CacheDecision {
                cache: true,
                ttl: Some(ttl),
                expires_at: Some(clock::now_millis() + ttl),
            })
        })
    }
}
