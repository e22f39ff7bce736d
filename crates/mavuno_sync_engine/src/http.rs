//! HTTP transport implementation.
//!
//! This module provides an HTTP-based [`Transport`]. The actual HTTP client is
//! abstracted via a trait to allow different implementations (reqwest, hyper,
//! a platform bridge on mobile, etc.).

use crate::error::TransportError;
use crate::transport::{Method, Transport, TransportRequest};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::time::Duration;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx/3xx statuses.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP exchange. Connection-level
/// failures (DNS, refused, reset) should be reported as
/// [`TransportError::Unreachable`]; a response with any status is `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Performs one exchange.
    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

/// HTTP-based transport.
///
/// Uses JSON encoding for request/response bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the API (e.g., "https://api.example.com/v1").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Joins the base URL and an endpoint.
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    fn record(&self, result: &Result<Value, TransportError>) {
        *self.last_error.write() = result.as_ref().err().map(|e| e.to_string());
    }
}

/// Decodes a JSON body; an empty body is `null`.
fn decode_body(body: &[u8]) -> Result<Value, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| TransportError::Protocol(format!("failed to decode response: {e}")))
}

#[async_trait]
impl<C: HttpClient> Transport for HttpTransport<C> {
    async fn send(
        &self,
        request: &TransportRequest,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let body = request
            .payload
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| TransportError::Protocol(format!("failed to encode request: {e}")))?;

        let url = self.url_for(&request.endpoint);
        let result = match self.client.execute(request.method, &url, body, timeout).await {
            Ok(response) if response.is_success() => decode_body(&response.body),
            Ok(response) => Err(TransportError::Status {
                code: response.status,
                message: String::from_utf8_lossy(&response.body).into_owned(),
            }),
            Err(e) => Err(e),
        };

        self.record(&result);
        result
    }
}
