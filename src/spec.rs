//! Declarative request specifications.
//!
//! A [`RequestSpec`] names one logical HTTP request: either an inline
//! [`Request`] or a `req_fn` closure over resolved params, plus the
//! dependency, retry, and cache policy the resolver honors while driving it
//! to completion. Specs are immutable after construction.
//!
//! Function-valued fields are first-class closures. They must be total: the
//! resolver protects every call, and a panic or `Err` is treated as a
//! policy-level "no decision" (an `exception` event is emitted and a safe
//! default used).

use crate::http::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Map of resolved param values handed to `req_fn` and
/// `prepare_lookup_params`, keyed by param name (dotted for path refs).
pub type ParamMap = serde_json::Map<String, Value>;

/// Produces a request descriptor from resolved params.
pub type ReqFn = dyn Fn(&ParamMap) -> crate::Result<Request> + Send + Sync;

/// Predicate deciding whether an exchange succeeded. Default: 2xx status.
pub type SuccessFn = dyn Fn(&Request, &Response) -> bool + Send + Sync;

/// Retry policy over a finished attempt.
pub type RetryFn = dyn Fn(&AttemptView<'_>) -> Option<RetryDecision> + Send + Sync;

/// Caching policy over a successful exchange.
pub type CacheFn = dyn Fn(&Request, &Response) -> Option<CacheDecision> + Send + Sync;

/// Projects a sub-request's response into the value installed in the
/// context. Default: the whole response.
pub type SelectFn = dyn Fn(&Response) -> Value + Send + Sync;

/// Transforms the lookup-param map before cache keying.
pub type PrepareLookupFn = dyn Fn(ParamMap) -> ParamMap + Send + Sync;

/// What a `retry_fn` sees: the attempt's request, its response (absent on
/// transport failure), and the 1-based attempt count for this key.
pub struct AttemptView<'a> {
    pub req: &'a Request,
    pub res: Option<&'a Response>,
    pub num_attempts: u32,
}

/// Decision returned by a `retry_fn`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryDecision {
    pub retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Keys to re-resolve (cache bypassed) before the next attempt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refresh: Vec<String>,
}

/// Decision returned by a `cache_fn`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheDecision {
    pub cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

/// Reference to a param: a plain name, or a path selecting a nested
/// position in the context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamRef {
    segments: Vec<String>,
}

impl ParamRef {
    pub fn name(name: impl Into<String>) -> Self {
        ParamRef {
            segments: vec![name.into()],
        }
    }

    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParamRef {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// First segment: the context key this ref roots at.
    pub fn root(&self) -> &str {
        self.segments.first().map(|s| s.as_str()).unwrap_or("")
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Dotted display name, also the key under which the resolved value
    /// appears in the param map.
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

impl From<&str> for ParamRef {
    fn from(name: &str) -> Self {
        ParamRef::name(name)
    }
}

impl From<String> for ParamRef {
    fn from(name: String) -> Self {
        ParamRef::name(name)
    }
}

impl<S: Into<String> + Clone> From<&[S]> for ParamRef {
    fn from(segments: &[S]) -> Self {
        ParamRef::path(segments.iter().cloned().map(Into::into))
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

/// Named configuration for one logical request.
#[derive(Clone)]
pub struct RequestSpec {
    pub(crate) req: Option<Request>,
    pub(crate) req_fn: Option<Arc<ReqFn>>,
    pub(crate) params: Vec<ParamRef>,
    pub(crate) lookup_params: Option<Vec<ParamRef>>,
    pub(crate) prepare_lookup_params: Option<Arc<PrepareLookupFn>>,
    pub(crate) cache_id: String,
    pub(crate) success: Option<Arc<SuccessFn>>,
    pub(crate) retry_fn: Option<Arc<RetryFn>>,
    pub(crate) cache_fn: Option<Arc<CacheFn>>,
}

impl RequestSpec {
    pub fn builder() -> RequestSpecBuilder {
        RequestSpecBuilder::default()
    }

    /// Spec wrapping an inline request with no policies.
    pub fn from_req(req: Request) -> Self {
        RequestSpec::builder().req(req).build()
    }

    /// Stable symbolic name used as the first element of the cache key.
    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }

    /// Param set used for cache keying: `lookup_params` when given,
    /// otherwise `params`.
    pub(crate) fn lookup_param_refs(&self) -> &[ParamRef] {
        self.lookup_params.as_deref().unwrap_or(&self.params)
    }

    pub(crate) fn has_request_source(&self) -> bool {
        self.req.is_some() || self.req_fn.is_some()
    }
}

impl fmt::Debug for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSpec")
            .field("req", &self.req)
            .field("req_fn", &self.req_fn.as_ref().map(|_| "<fn>"))
            .field("params", &self.params)
            .field("lookup_params", &self.lookup_params)
            .field("cache_id", &self.cache_id)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct RequestSpecBuilder {
    req: Option<Request>,
    req_fn: Option<Arc<ReqFn>>,
    req_fn_name: Option<String>,
    params: Vec<ParamRef>,
    lookup_params: Option<Vec<ParamRef>>,
    prepare_lookup_params: Option<Arc<PrepareLookupFn>>,
    lookup_id: Option<String>,
    success: Option<Arc<SuccessFn>>,
    retry_fn: Option<Arc<RetryFn>>,
    cache_fn: Option<Arc<CacheFn>>,
}

impl RequestSpecBuilder {
    pub fn req(mut self, req: Request) -> Self {
        self.req = Some(req);
        self
    }

    /// Request-producing function with a stable symbolic name; the name
    /// doubles as the derived cache id.
    pub fn req_fn_named<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ParamMap) -> crate::Result<Request> + Send + Sync + 'static,
    {
        self.req_fn = Some(Arc::new(f));
        self.req_fn_name = Some(name.into());
        self
    }

    /// Anonymous request-producing function. Without `lookup_id`, the cache
    /// id degrades to a random identifier (with a diagnostic), so prefer
    /// [`req_fn_named`](Self::req_fn_named) for cacheable specs.
    pub fn req_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ParamMap) -> crate::Result<Request> + Send + Sync + 'static,
    {
        self.req_fn = Some(Arc::new(f));
        self
    }

    pub fn params<I, P>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ParamRef>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn lookup_params<I, P>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ParamRef>,
    {
        self.lookup_params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    pub fn prepare_lookup_params<F>(mut self, f: F) -> Self
    where
        F: Fn(ParamMap) -> ParamMap + Send + Sync + 'static,
    {
        self.prepare_lookup_params = Some(Arc::new(f));
        self
    }

    pub fn lookup_id(mut self, id: impl Into<String>) -> Self {
        self.lookup_id = Some(id.into());
        self
    }

    pub fn success<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request, &Response) -> bool + Send + Sync + 'static,
    {
        self.success = Some(Arc::new(f));
        self
    }

    pub fn retry_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&AttemptView<'_>) -> Option<RetryDecision> + Send + Sync + 'static,
    {
        self.retry_fn = Some(Arc::new(f));
        self
    }

    pub fn cache_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request, &Response) -> Option<CacheDecision> + Send + Sync + 'static,
    {
        self.cache_fn = Some(Arc::new(f));
        self
    }

    /// Attach a built [`RetryPolicy`](crate::policy::RetryPolicy) as this
    /// spec's `retry_fn`.
    pub fn retry_policy(mut self, policy: crate::policy::RetryPolicy) -> Self {
        self.retry_fn = Some(policy.build());
        self
    }

    /// Attach a built [`CachePolicy`](crate::policy::CachePolicy) as this
    /// spec's `cache_fn`.
    pub fn cache_policy(mut self, policy: crate::policy::CachePolicy) -> Self {
        self.cache_fn = Some(policy.build());
        self
    }

    pub fn build(self) -> RequestSpec {
        let cache_id = match (self.lookup_id, &self.req_fn_name, &self.req_fn) {
            (Some(id), _, _) => id,
            (None, Some(name), _) => name.clone(),
            (None, None, Some(_)) => {
                let id = format!("fn-{}", Uuid::new_v4());
                tracing::warn!(
                    cache_id = %id,
                    "anonymous req_fn without lookup_id; cache keys will not be stable across processes"
                );
                id
            }
            (None, None, None) => "req".to_string(),
        };
        RequestSpec {
            req: self.req,
            req_fn: self.req_fn,
            params: self.params,
            lookup_params: self.lookup_params,
            prepare_lookup_params: self.prepare_lookup_params,
            cache_id,
            success: self.success,
            retry_fn: self.retry_fn,
            cache_fn: self.cache_fn,
        }
    }
}

/// A caller-supplied param value: either resolved data, or a sub-request
/// spec the resolver lifts into its specs table.
#[derive(Clone)]
pub enum ParamValue {
    Value(Value),
    Spec(Box<SubRequest>),
}

/// Sub-request attached as a param, with an optional projection applied to
/// its successful response before the value enters the context.
#[derive(Clone)]
pub struct SubRequest {
    pub spec: RequestSpec,
    pub select: Option<Arc<SelectFn>>,
}

/// Initial params for a resolution, keyed by param name.
#[derive(Clone, Default)]
pub struct Params {
    pub(crate) entries: std::collections::HashMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a resolved value.
    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.insert(name.into(), ParamValue::Value(value));
        self
    }

    /// Attach a sub-request whose whole response becomes the param value.
    pub fn sub_request(mut self, name: impl Into<String>, spec: RequestSpec) -> Self {
        self.entries.insert(
            name.into(),
            ParamValue::Spec(Box::new(SubRequest { spec, select: None })),
        );
        self
    }

    /// Attach a sub-request with a projection over its response.
    pub fn sub_request_select<F>(
        mut self,
        name: impl Into<String>,
        spec: RequestSpec,
        select: F,
    ) -> Self
    where
        F: Fn(&Response) -> Value + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            ParamValue::Spec(Box::new(SubRequest {
                spec,
                select: Some(Arc::new(select)),
            })),
        );
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
