//! # reqflow
//!
//! Declarative HTTP request orchestration. A [`RequestSpec`] describes one
//! logical request - optionally depending on other requests (an access
//! token, a discovery document), with retry and cache policy attached - and
//! the resolver drives the whole graph to a single result, emitting an
//! ordered event stream along the way.
//!
//! ```rust,no_run
//! use reqflow::{request, Request, RequestOptions, RequestSpec};
//!
//! # async fn run() -> reqflow::Result<()> {
//! let spec = RequestSpec::from_req(Request::get("http://example.com/"));
//! let outcome = request(spec, RequestOptions::default()).await?;
//! assert!(outcome.success);
//! # Ok(())
//! # }
//! ```
//!
//! The moving parts, leaves first:
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`clock`], [`fingerprint`] | epoch-millis time, stable param digests |
//! | [`http`] | request/response descriptors |
//! | [`transport`] | the one network operation + stub registry |
//! | [`cache`] | pluggable backends (memory, filesystem, Redis) |
//! | [`spec`] | declarative request specifications |
//! | [`policy`] | retry/cache policy builders |
//! | [`resolver`] | the dependency-driven resolution engine |
//! | [`events`] | the bounded lifecycle event stream |
//! | [`outcome`] | result assembly from the event log |

pub mod api;
pub mod cache;
pub mod clock;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod http;
pub mod outcome;
pub mod policy;
pub mod resolver;
pub mod spec;
pub mod transport;
pub mod utils;

pub use api::{make_requests, request, request_with_log, RequestOptions, ROOT_KEY};
pub use cache::{CacheBackend, CacheEntry, CacheKey, FsCache, MemoryCache};
#[cfg(feature = "redis-backend")]
pub use cache::RedisCache;
pub use error::{Error, Result};
pub use events::{Event, FailureReason, DEFAULT_EVENT_BUFFER};
pub use http::{BasicAuth, Headers, Method, Request, Response};
pub use outcome::{CacheStatus, ExceptionReport, Outcome};
pub use policy::{CachePolicy, RetryPolicy};
pub use resolver::{Exchange, TransportFailure};
pub use spec::{
    AttemptView, CacheDecision, ParamMap, ParamRef, ParamValue, Params, RequestSpec,
    RequestSpecBuilder, RetryDecision, SubRequest,
};
pub use transport::{register_responder, clear_responders, Transport, TransportError};
