//! Bounded-timeout HTTP probes against worker control endpoints.
//!
//! [`ProbeClient::probe`] never fails: refused connections, resets, DNS
//! errors and timeouts all come back as a [`ProbeResult`] with
//! `status_code == 0`. The whole request, body included, runs inside one
//! timeout; when it fires the request future is dropped, which closes the
//! socket.

use reqwest::Method;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, trace};

/// Description of one probe request.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: Method,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ProbeRequest {
    /// A `GET` with the given timeout.
    pub fn get(timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            body: None,
            headers: Vec::new(),
            timeout,
        }
    }

    /// A `POST` with the given timeout and no body.
    pub fn post(timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(timeout)
        }
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Ask intermediaries not to serve a cached reply (frame polling).
    pub fn no_cache(self) -> Self {
        self.with_header("Cache-Control", "no-cache")
            .with_header("Pragma", "no-cache")
    }
}

/// Normalised result of a probe. Always a value, never an error.
///
/// `ok` implies a 2xx status. A 2xx reply whose body is empty or not JSON
/// still has `ok == true` with an empty-object payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub ok: bool,
    /// HTTP status, or 0 when the transport failed
    pub status_code: u16,
    /// Parsed JSON body, or `{}`
    pub payload: Value,
    /// Transport error description when `status_code == 0`
    pub error: Option<String>,
}

impl ProbeResult {
    /// A transport-level failure.
    pub fn transport_failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status_code: 0,
            payload: Value::Object(Map::new()),
            error: Some(error.into()),
        }
    }

    /// Build a result from a status code and raw body bytes.
    pub fn from_response(status_code: u16, body: &[u8]) -> Self {
        let payload = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(Map::new()))
        };
        Self {
            ok: (200..300).contains(&status_code),
            status_code,
            payload,
            error: None,
        }
    }

    /// True when no HTTP response was received at all.
    pub fn is_transport_failure(&self) -> bool {
        self.status_code == 0
    }

    /// String field of the payload.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// Boolean field of the payload.
    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.payload.get(name).and_then(Value::as_bool)
    }

    /// Best human-readable explanation carried by the result.
    pub fn message(&self) -> String {
        self.str_field("message")
            .or_else(|| self.str_field("error"))
            .map(String::from)
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| {
                if self.is_transport_failure() {
                    "worker unreachable".to_string()
                } else {
                    format!("worker returned status {}", self.status_code)
                }
            })
    }
}

/// HTTP client for worker control endpoints.
#[derive(Debug, Clone)]
pub struct ProbeClient {
    client: reqwest::Client,
}

impl Default for ProbeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeClient {
    /// Create a probe client.
    ///
    /// Workers live on local addresses, so proxies from the environment are
    /// ignored.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Issue `request` against `base_url` + `path`.
    pub async fn probe(&self, base_url: &str, path: &str, request: ProbeRequest) -> ProbeResult {
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let timeout = request.timeout;

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .timeout(timeout)
            .header("Content-Type", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_string());
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let result = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok((status, body))) => ProbeResult::from_response(status, &body),
            Ok(Err(e)) => ProbeResult::transport_failure(describe_transport_error(&e)),
            Err(_) => ProbeResult::transport_failure(format!(
                "timed out after {}ms",
                timeout.as_millis()
            )),
        };

        if result.is_transport_failure() {
            debug!(
                method = %request.method,
                url = %url,
                error = result.error.as_deref().unwrap_or_default(),
                "probe failed"
            );
        } else {
            trace!(method = %request.method, url = %url, status = result.status_code, "probe");
        }

        result
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}
