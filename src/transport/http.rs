//! reqwest-backed transport.

use super::{Transport, TransportError};
use crate::http::{Headers, Method, Request, Response};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

/// Real HTTP transport. Error statuses come back as response data; only
/// connection-level failures raise.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with production-friendly defaults. Timeout and
    /// proxy are env-overridable (`REQFLOW_HTTP_TIMEOUT_SECS`,
    /// `REQFLOW_PROXY_URL`).
    pub fn new() -> crate::Result<Self> {
        let timeout_secs = env::var("REQFLOW_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(300);

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("REQFLOW_PROXY_URL") {
            if let Ok(proxy) = reqwest::Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| crate::Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client })
    }

    fn method_of(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Patch => reqwest::Method::PATCH,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }

    fn build(&self, req: &Request) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(Self::method_of(req.method), &req.url);

        for (name, value) in req.headers.iter() {
            builder = builder.header(name, value);
        }
        if !req.query_params.is_empty() {
            builder = builder.query(&req.query_params);
        }
        if let Some(auth) = &req.basic_auth {
            builder = builder.basic_auth(&auth.username, auth.password.as_deref());
        }
        if let Some(content_type) = &req.content_type {
            builder = builder.header("content-type", content_type.clone());
        }
        if let Some(accept) = &req.accept {
            builder = builder.header("accept", accept.clone());
        }

        if !req.form_params.is_empty() {
            builder = builder.form(&req.form_params);
        } else if let Some(body) = &req.body {
            // A string body with an explicit non-JSON content type goes out
            // raw; everything else is sent as JSON.
            match (body, &req.content_type) {
                (Value::String(s), Some(ct)) if !ct.contains("json") => {
                    builder = builder.body(s.clone());
                }
                _ => {
                    builder = builder.json(body);
                }
            }
        }
        builder
    }

    async fn decode(req: &Request, resp: reqwest::Response) -> Result<Response, TransportError> {
        let status = resp.status().as_u16();
        let headers: Headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|s| (k.as_str().to_string(), s.to_string()))
            })
            .collect();

        let handle = json!({
            "remote_addr": resp.remote_addr().map(|a| a.to_string()),
            "version": format!("{:?}", resp.version()),
            "url": resp.url().to_string(),
        });

        let wants_json = req
            .accept
            .as_deref()
            .map(|a| a.contains("json"))
            .unwrap_or(true)
            || headers
                .get("content-type")
                .map(|ct| ct.contains("json"))
                .unwrap_or(false);

        let text = resp.text().await.map_err(TransportError::classify)?;
        let body = if wants_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        Ok(Response {
            status,
            headers,
            body,
            handle: Some(handle),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, req: &Request) -> Result<Response, TransportError> {
        let resp = self
            .build(req)
            .send()
            .await
            .map_err(TransportError::classify)?;
        Self::decode(req, resp).await
    }
}
