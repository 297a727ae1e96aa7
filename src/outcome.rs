//! Result assembly from a completed event stream.
//!
//! The assembler is a pure fold over the ordered event list: the caller
//! (or `request`) collects the stream, and this module condenses it into
//! the caller-facing [`Outcome`] record.

use crate::events::{Event, FailureReason};
use crate::http::Headers;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Caller-facing result of a resolution.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    /// Status of the winning response for the target key, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    pub body: Value,
    pub success: bool,
    /// Ordered `response` / `cache-hit` / `store-in-cache` / `failed`
    /// events, with `path` stripped and consecutive duplicate failure
    /// payloads removed.
    pub log: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<CacheStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<ExceptionReport>,
    /// Guidance when the terminal failure is `missing-params`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub cache_hit: bool,
    pub stored_in_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExceptionReport {
    pub source: String,
    pub message: String,
}

impl Outcome {
    /// Fold the event list for `target` into an outcome. `supplied_params`
    /// is the set of param names the caller seeded, used only for the
    /// missing-params hint.
    pub fn assemble(target: &str, supplied_params: &HashSet<String>, events: &[Event]) -> Outcome {
        let mut outcome = Outcome {
            status: None,
            headers: Headers::new(),
            body: Value::Null,
            success: false,
            log: Vec::new(),
            cache_status: None,
            exceptions: Vec::new(),
            hint: None,
        };
        let mut terminal_missing: Option<Vec<String>> = None;

        for event in events {
            match event {
                Event::Response {
                    path,
                    res,
                    success,
                    ..
                } if path == target => {
                    outcome.status = Some(res.status);
                    outcome.headers = res.headers.clone();
                    outcome.body = res.body.clone();
                    outcome.success = *success;
                }
                Event::CacheHit {
                    path,
                    res,
                    cached_at,
                    expires_at,
                    metadata,
                    ..
                } if path == target => {
                    outcome.status = Some(res.status);
                    outcome.headers = res.headers.clone();
                    outcome.body = res.body.clone();
                    outcome.success = true;
                    outcome.cache_status = Some(CacheStatus {
                        cache_hit: true,
                        stored_in_cache: false,
                        cached_at: Some(*cached_at),
                        expires_at: *expires_at,
                        key: metadata.get("key").cloned(),
                    });
                }
                Event::StoreInCache {
                    path,
                    cached_at,
                    expires_at,
                    metadata,
                    ..
                } if path == target => {
                    outcome.cache_status = Some(CacheStatus {
                        cache_hit: false,
                        stored_in_cache: true,
                        cached_at: Some(*cached_at),
                        expires_at: *expires_at,
                        key: metadata.get("key").cloned(),
                    });
                }
                Event::Exception { source, message } => {
                    outcome.exceptions.push(ExceptionReport {
                        source: source.clone(),
                        message: message.clone(),
                    });
                }
                Event::Failed { path, reason, data } if path == target => {
                    outcome.success = false;
                    if *reason == FailureReason::MissingParams {
                        terminal_missing = Some(missing_names(data));
                    }
                }
                _ => {}
            }

            if let Some(entry) = log_entry(event) {
                // only consecutive duplicate failure payloads are dropped
                let duplicate_failure = matches!(event, Event::Failed { .. })
                    && outcome.log.last() == Some(&entry);
                if !duplicate_failure {
                    outcome.log.push(entry);
                }
            }
        }

        if let Some(missing) = terminal_missing {
            let unsupplied: Vec<&String> = missing
                .iter()
                .filter(|name| !supplied_params.contains(name.as_str()))
                .collect();
            if !unsupplied.is_empty() {
                outcome.hint = Some(format!(
                    "Missing params {:?}. Initial values are supplied via RequestOptions::params, \
                     e.g. Params::new().value(\"{}\", ...)",
                    missing, unsupplied[0]
                ));
            }
        }

        outcome
    }
}

fn missing_names(data: &Value) -> Vec<String> {
    data.get("missing")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Events that belong in the audit log, serialized with `path` stripped.
fn log_entry(event: &Event) -> Option<Value> {
    match event {
        Event::Response { .. }
        | Event::CacheHit { .. }
        | Event::StoreInCache { .. }
        | Event::Failed { .. } => {
            let mut value = serde_json::to_value(event).ok()?;
            if let Some(obj) = value.as_object_mut() {
                obj.remove("path");
            }
            Some(value)
        }
        _ => None,
    }
}
