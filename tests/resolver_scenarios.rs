//! End-to-end resolution scenarios against a scripted stub transport.

mod common;

use common::{collect, kinds, StubTransport};
use reqflow::{
    make_requests, request, request_with_log, CacheBackend, CacheEntry, CacheKey, CachePolicy,
    Event, MemoryCache, Params, Request, RequestOptions, RequestSpec, Response, RetryDecision,
    RetryPolicy,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn options_with(transport: Arc<StubTransport>) -> RequestOptions {
    RequestOptions::new().with_transport(transport)
}

#[tokio::test]
async fn basic_get() {
    let transport = Arc::new(
        StubTransport::new().on("http://ex/", vec![Response::new(200, json!({"yep": "Indeed"}))]),
    );
    let spec = RequestSpec::from_req(Request::get("http://ex/"));

    let (events, handle) =
        request_with_log(spec, options_with(transport)).expect("start resolution");
    let events = collect(events).await;
    let outcome = handle.await.unwrap();

    assert_eq!(kinds(&events), vec!["request", "response"]);
    assert!(outcome.success);
    assert_eq!(outcome.status, Some(200));
    assert_eq!(outcome.body, json!({"yep": "Indeed"}));
}

#[tokio::test]
async fn retry_on_500_then_success() {
    let transport = Arc::new(StubTransport::new().on(
        "http://flaky/",
        vec![
            Response::new(500, json!({"err": "boom"})),
            Response::new(200, json!({"ok?": true})),
        ],
    ));
    let spec = RequestSpec::builder()
        .req(Request::get("http://flaky/"))
        .retry_policy(RetryPolicy::new(2))
        .build();

    let (events, handle) =
        request_with_log(spec, options_with(transport.clone())).expect("start resolution");
    let events = collect(events).await;
    let outcome = handle.await.unwrap();

    assert_eq!(
        kinds(&events),
        vec!["request", "response", "request", "response"]
    );
    assert!(outcome.success);
    assert_eq!(outcome.body, json!({"ok?": true}));
    assert_eq!(transport.requests_to("http://flaky/").len(), 2);
}

#[tokio::test]
async fn retries_exhausted() {
    let transport = Arc::new(
        StubTransport::new().on("http://down/", vec![Response::new(500, json!({}))]),
    );
    let spec = RequestSpec::builder()
        .req(Request::get("http://down/"))
        .retry_policy(RetryPolicy::new(1))
        .build();

    let (events, handle) =
        request_with_log(spec, options_with(transport.clone())).expect("start resolution");
    let events = collect(events).await;
    let outcome = handle.await.unwrap();

    assert_eq!(
        kinds(&events),
        vec!["request", "response", "request", "response", "failed"]
    );
    assert!(!outcome.success);
    // two attempts: the original and one retry
    assert_eq!(transport.requests_to("http://down/").len(), 2);

    let failed = outcome.log.last().expect("terminal log entry");
    assert_eq!(failed["event"], "failed");
    assert_eq!(failed["reason"], "retries-exhausted");
    assert_eq!(failed["data"]["attempts"], 2);
    assert_eq!(failed["data"]["max_retries"], 1);
}

#[tokio::test]
async fn dependent_token_resolves_first() {
    let transport = Arc::new(
        StubTransport::new()
            .on("http://auth/", vec![Response::new(200, json!({"token": "T"}))])
            .on("http://svc/", vec![Response::new(200, json!({"data": 1}))]),
    );

    let token_spec = RequestSpec::from_req(Request::get("http://auth/"));
    let spec = RequestSpec::builder()
        .req_fn_named("svc/fetch", |params| {
            let token = params
                .get("token")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(Request::get("http://svc/")
                .with_header("authorization", format!("Bearer {}", token)))
        })
        .params(["token"])
        .build();

    let options = options_with(transport.clone()).with_params(
        Params::new().sub_request_select("token", token_spec, |res| {
            res.body.get("token").cloned().unwrap_or(Value::Null)
        }),
    );

    let (events, handle) = request_with_log(spec, options).expect("start resolution");
    let events = collect(events).await;
    let outcome = handle.await.unwrap();

    assert!(outcome.success);
    let paths: Vec<_> = events.iter().map(|e| e.path().unwrap().to_string()).collect();
    assert_eq!(paths, vec!["token", "token", "root", "root"]);
    assert_eq!(
        kinds(&events),
        vec!["request", "response", "request", "response"]
    );

    let svc_requests = transport.requests_to("http://svc/");
    assert_eq!(svc_requests.len(), 1);
    assert_eq!(svc_requests[0].headers.get("authorization"), Some("Bearer T"));
}

#[tokio::test]
async fn cache_hit_skips_dependency_resolution() {
    // no scripts at all: any transport call would fail the test
    let transport = Arc::new(StubTransport::new());
    let cache: Arc<MemoryCache> = Arc::new(MemoryCache::new());

    let entry = CacheEntry::new(None, &Response::new(200, json!({"cached": true})), 1, None);
    cache
        .put(&CacheKey::spec("A", Some(json!({"id": 42}))), entry)
        .await
        .unwrap();

    let token_spec = RequestSpec::from_req(Request::get("http://auth/"));
    let spec = RequestSpec::builder()
        .lookup_id("A")
        .req_fn_named("a/fetch", |_params| Ok(Request::get("http://svc/")))
        .params(["id", "token"])
        .lookup_params(["id"])
        .build();

    let options = options_with(transport.clone())
        .with_cache(cache)
        .with_params(
            Params::new()
                .value("id", json!(42))
                .sub_request("token", token_spec),
        );

    let (events, handle) = request_with_log(spec, options).expect("start resolution");
    let events = collect(events).await;
    let outcome = handle.await.unwrap();

    assert_eq!(kinds(&events), vec!["cache-hit"]);
    assert!(outcome.success);
    assert_eq!(outcome.body, json!({"cached": true}));
    let cache_status = outcome.cache_status.expect("cache status");
    assert!(cache_status.cache_hit);
    assert!(transport.seen().is_empty());
}

#[tokio::test]
async fn refresh_on_401_bypasses_cache() {
    let transport = Arc::new(
        StubTransport::new()
            .on(
                "http://svc/",
                vec![
                    Response::new(401, json!({"err": "expired"})),
                    Response::new(200, json!({"data": 1})),
                ],
            )
            .on(
                "http://auth/",
                vec![Response::new(200, json!({"token": "T2"}))],
            ),
    );
    let cache: Arc<MemoryCache> = Arc::new(MemoryCache::new());

    // the token sub-spec has no params, so its projection is empty and its
    // cache id is the inline-request sentinel
    let stale = CacheEntry::new(None, &Response::new(200, json!({"token": "T1"})), 1, None);
    cache.put(&CacheKey::spec("req", None), stale).await.unwrap();

    let token_spec = RequestSpec::from_req(Request::get("http://auth/"));
    let spec = RequestSpec::builder()
        .req_fn_named("svc/fetch", |params| {
            let token = params
                .get("token")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(Request::get("http://svc/")
                .with_header("authorization", format!("Bearer {}", token)))
        })
        .params(["token"])
        .retry_fn(|attempt| {
            if attempt.res.map(|r| r.status) == Some(401) {
                Some(RetryDecision {
                    retry: true,
                    delay: None,
                    max_retries: Some(2),
                    refresh: vec!["token".to_string()],
                })
            } else {
                None
            }
        })
        .build();

    let options = options_with(transport.clone())
        .with_cache(cache)
        .with_params(Params::new().sub_request_select("token", token_spec, |res| {
            res.body.get("token").cloned().unwrap_or(Value::Null)
        }));

    let (events, handle) = request_with_log(spec, options).expect("start resolution");
    let events = collect(events).await;
    let outcome = handle.await.unwrap();

    assert_eq!(
        kinds(&events),
        vec![
            "cache-hit", // token from cache
            "request",   // first svc attempt with T1
            "response",  // 401
            "request",   // token re-resolved, cache bypassed
            "response",
            "request", // second svc attempt with T2
            "response",
        ]
    );
    assert!(outcome.success);

    let svc_requests = transport.requests_to("http://svc/");
    assert_eq!(svc_requests.len(), 2);
    assert_eq!(svc_requests[0].headers.get("authorization"), Some("Bearer T1"));
    assert_eq!(svc_requests[1].headers.get("authorization"), Some("Bearer T2"));
}

#[tokio::test]
async fn missing_params_fail_with_hint() {
    let transport = Arc::new(StubTransport::new());
    let spec = RequestSpec::builder()
        .req_fn_named("svc/fetch", |_params| Ok(Request::get("http://svc/")))
        .params(["token"])
        .build();

    let outcome = request(spec, options_with(transport)).await.unwrap();
    assert!(!outcome.success);
    let failed = outcome.log.last().expect("terminal entry");
    assert_eq!(failed["reason"], "missing-params");
    assert_eq!(failed["data"]["missing"], json!(["token"]));
    assert!(outcome.hint.expect("hint").contains("token"));
}

#[tokio::test]
async fn spec_without_req_or_req_fn_fails() {
    let transport = Arc::new(StubTransport::new());
    let spec = RequestSpec::builder().build();

    let outcome = request(spec, options_with(transport)).await.unwrap();
    assert!(!outcome.success);
    let failed = outcome.log.last().expect("terminal entry");
    assert_eq!(failed["reason"], "missing-req-or-req-fn");
}

#[tokio::test]
async fn transport_failure_is_classified() {
    // the stub raises UnknownHost for unscripted URLs
    let transport = Arc::new(StubTransport::new());
    let spec = RequestSpec::from_req(Request::get("http://nowhere.invalid/"));

    let (events, handle) =
        request_with_log(spec, options_with(transport)).expect("start resolution");
    let events = collect(events).await;
    let outcome = handle.await.unwrap();

    assert_eq!(kinds(&events), vec!["request", "exception", "failed"]);
    assert!(!outcome.success);
    assert_eq!(outcome.exceptions.len(), 1);
    assert_eq!(outcome.exceptions[0].source, "transport");
    let failed = outcome.log.last().expect("terminal entry");
    assert_eq!(failed["reason"], "unknown-host");
}

#[tokio::test]
async fn panicking_success_predicate_is_protected() {
    let transport = Arc::new(
        StubTransport::new().on("http://ex/", vec![Response::new(200, json!({}))]),
    );
    let spec = RequestSpec::builder()
        .req(Request::get("http://ex/"))
        .success(|_req, _res| panic!("user bug"))
        .build();

    let (events, handle) =
        request_with_log(spec, options_with(transport)).expect("start resolution");
    let events = collect(events).await;
    let outcome = handle.await.unwrap();

    // predicate panic is swallowed; success defaults to false
    assert_eq!(
        kinds(&events),
        vec!["request", "exception", "response", "failed"]
    );
    assert!(!outcome.success);
    assert_eq!(outcome.exceptions[0].source, "success-fn");
    let failed = outcome.log.last().expect("terminal entry");
    assert_eq!(failed["reason"], "request-failed");
}

#[tokio::test]
async fn invalid_cache_decision_is_dropped() {
    let transport = Arc::new(
        StubTransport::new().on("http://ex/", vec![Response::new(200, json!({}))]),
    );
    let cache: Arc<MemoryCache> = Arc::new(MemoryCache::new());
    let spec = RequestSpec::builder()
        .req(Request::get("http://ex/"))
        .cache_fn(|_req, _res| {
            Some(reqflow::CacheDecision {
                cache: true,
                expires_at: None,
                ttl: None,
            })
        })
        .build();

    let options = options_with(transport).with_cache(cache.clone());
    let (events, handle) = request_with_log(spec, options).expect("start resolution");
    let events = collect(events).await;
    let outcome = handle.await.unwrap();

    assert_eq!(kinds(&events), vec!["request", "invalid-data", "response"]);
    assert!(outcome.success);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn store_then_hit_round_trip() {
    let transport = Arc::new(StubTransport::new().on(
        "http://ex/",
        vec![{
            let mut res = Response::new(200, json!({"n": 7}));
            res.handle = Some(json!({"remote_addr": "10.0.0.1:80"}));
            res
        }],
    ));
    let cache: Arc<MemoryCache> = Arc::new(MemoryCache::new());

    let build_spec = || {
        RequestSpec::builder()
            .lookup_id("numbers/fetch")
            .req(Request::get("http://ex/"))
            .cache_policy(CachePolicy::with_ttl(60_000))
            .build()
    };

    let options = options_with(transport.clone()).with_cache(cache.clone());
    let (events, handle) =
        request_with_log(build_spec(), options.clone()).expect("start resolution");
    let first_events = collect(events).await;
    let first = handle.await.unwrap();

    assert_eq!(
        kinds(&first_events),
        vec!["request", "response", "store-in-cache"]
    );
    assert!(first.success);
    let cache_status = first.cache_status.expect("cache status");
    assert!(cache_status.stored_in_cache);
    assert!(!cache_status.cache_hit);

    // the stored entry never carries the transport handle
    let entry = cache
        .lookup(&CacheKey::spec("numbers/fetch", None))
        .await
        .unwrap()
        .expect("stored entry");
    assert_eq!(entry.res.handle, None);
    assert_eq!(entry.res.body, json!({"n": 7}));

    // second resolution is served from the cache
    let (events, handle) = request_with_log(build_spec(), options).expect("start resolution");
    let second_events = collect(events).await;
    let second = handle.await.unwrap();

    assert_eq!(kinds(&second_events), vec!["cache-hit"]);
    assert!(second.success);
    assert!(second.cache_status.expect("cache status").cache_hit);
    assert_eq!(transport.requests_to("http://ex/").len(), 1);
}

#[tokio::test]
async fn cache_backend_errors_do_not_fail_the_exchange() {
    struct FailingCache;

    #[async_trait::async_trait]
    impl CacheBackend for FailingCache {
        async fn lookup(
            &self,
            _key: &CacheKey,
        ) -> reqflow::Result<Option<CacheEntry>> {
            Err(reqflow::Error::cache("lookup exploded"))
        }
        async fn put(&self, _key: &CacheKey, _entry: CacheEntry) -> reqflow::Result<Value> {
            Err(reqflow::Error::cache("put exploded"))
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    let transport = Arc::new(
        StubTransport::new().on("http://ex/", vec![Response::new(200, json!({"ok": true}))]),
    );
    let spec = RequestSpec::builder()
        .req(Request::get("http://ex/"))
        .cache_policy(CachePolicy::with_ttl(60_000))
        .build();

    let options = options_with(transport).with_cache(Arc::new(FailingCache));
    let (events, handle) = request_with_log(spec, options).expect("start resolution");
    let events = collect(events).await;
    let outcome = handle.await.unwrap();

    assert_eq!(
        kinds(&events),
        vec!["exception", "request", "response", "exception"]
    );
    assert!(outcome.success);
    let sources: Vec<_> = outcome.exceptions.iter().map(|e| e.source.as_str()).collect();
    assert_eq!(sources, vec!["cache/lookup", "cache/put"]);
}

#[tokio::test]
async fn make_requests_resolves_multiple_targets() {
    let transport = Arc::new(
        StubTransport::new()
            .on("http://a/", vec![Response::new(200, json!({"a": 1}))])
            .on("http://b/", vec![Response::new(200, json!({"b": 2}))]),
    );
    let options = options_with(transport);

    let stream = make_requests(
        options,
        vec![
            ("a".to_string(), RequestSpec::from_req(Request::get("http://a/"))),
            ("b".to_string(), RequestSpec::from_req(Request::get("http://b/"))),
        ],
    )
    .expect("start resolution");
    let events = collect(stream).await;

    // both targets dispatch in the same pass; within-pass order is free
    assert_eq!(events.len(), 4);
    let mut responses: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, Event::Response { .. }))
        .map(|e| e.path().unwrap().to_string())
        .collect();
    responses.sort();
    assert_eq!(responses, vec!["a", "b"]);
}

#[tokio::test]
async fn custom_success_predicate_drives_failure() {
    let transport = Arc::new(
        StubTransport::new().on("http://ex/", vec![Response::new(200, json!({"ok": false}))]),
    );
    let spec = RequestSpec::builder()
        .req(Request::get("http://ex/"))
        .success(|_req, res| res.body.get("ok") == Some(&json!(true)))
        .build();

    let outcome = request(spec, options_with(transport)).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.status, Some(200));
    let failed = outcome.log.last().expect("terminal entry");
    assert_eq!(failed["reason"], "request-failed");
}
