use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vista_core::{kinds, DataSourceDescriptor, ErrorCode};

use crate::error::{FetchError, FetchResult, TransportError};
use crate::executor::{FetchKind, FetchKindBase};

/// Per-request timeout when the descriptor does not set one
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5000;

const SUPPORTED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Everything a transport needs to perform one request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Target url
    pub url: String,
    /// Upper-case method name
    pub method: String,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// Query parameters
    pub params: Vec<(String, String)>,
    /// JSON body for methods that carry one
    pub body: Option<Value>,
    /// Transport-level timeout
    pub timeout: Duration,
}

/// Network I/O seam for the HTTP kind. Retry, auth and interceptors
/// belong to implementations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform the request and return the parsed body
    async fn send(&self, request: HttpRequest) -> Result<Value, TransportError>;
}

/// Default transport backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with connection defaults
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<Value, TransportError> {
        let method = Method::from_str(&request.method)
            .map_err(|_| TransportError::InvalidRequest(format!("Invalid HTTP method: {}", request.method)))?;

        let mut req = self.client.request(method.clone(), &request.url).timeout(request.timeout);

        for (key, value) in &request.headers {
            req = req.header(key, value);
        }

        if !request.params.is_empty() {
            req = req.query(&request.params);
        }

        // Add body for non-GET/HEAD requests if provided
        if method != Method::GET && method != Method::HEAD {
            if let Some(body) = &request.body {
                req = req.json(body);
            }
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text.chars().take(512).collect(),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// HTTP kind: reads `url`, `method`, `headers`, `params`, `body` and
/// `timeout` (ms) from the descriptor config
pub struct HttpKind {
    transport: Arc<dyn HttpTransport>,
}

impl HttpKind {
    /// Create the kind over a transport
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    fn build_request(descriptor: &DataSourceDescriptor) -> FetchResult<HttpRequest> {
        let url = descriptor
            .config_str("url")
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                FetchError::new(
                    ErrorCode::HttpNoUrl,
                    format!("http data source '{}' has no url", descriptor.id),
                )
            })?;

        let method = descriptor.config_str("method").unwrap_or("GET").to_uppercase();
        let timeout_ms = descriptor
            .config
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS);

        Ok(HttpRequest {
            url: url.to_string(),
            method,
            headers: string_pairs(descriptor.config.get("headers")),
            params: string_pairs(descriptor.config.get("params")),
            body: descriptor.config.get("body").filter(|b| !b.is_null()).cloned(),
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Flatten an object into string pairs; non-string values are JSON-encoded
fn string_pairs(value: Option<&Value>) -> Vec<(String, String)> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| match v {
                    Value::String(s) => (k.clone(), s.clone()),
                    other => (k.clone(), other.to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl FetchKindBase for HttpKind {
    fn kind(&self) -> &str {
        kinds::HTTP
    }
}

#[async_trait]
impl FetchKind for HttpKind {
    async fn fetch(&self, descriptor: &DataSourceDescriptor) -> FetchResult<Value> {
        let request = Self::build_request(descriptor)?;
        let timeout = request.timeout;

        debug!(source_id = %descriptor.id, url = %request.url, method = %request.method, "Making HTTP request");

        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Err(_) | Ok(Err(TransportError::Timeout)) => Err(FetchError::new(
                ErrorCode::HttpTimeout,
                format!("request timed out after {}ms", timeout.as_millis()),
            )),
            Ok(Err(e)) => Err(FetchError::new(ErrorCode::HttpRequestFailed, e.to_string())),
            Ok(Ok(body)) => Ok(body),
        }
    }

    fn validate(&self, descriptor: &DataSourceDescriptor) -> Vec<String> {
        let mut errors = Vec::new();
        if descriptor.config_str("url").map_or(true, |url| url.trim().is_empty()) {
            errors.push("http data source requires config.url".to_string());
        }
        if let Some(method) = descriptor.config_str("method") {
            if !SUPPORTED_METHODS.contains(&method.to_uppercase().as_str()) {
                errors.push(format!("unsupported HTTP method: {}", method));
            }
        }
        errors
    }
}
