//! Transport layer abstraction for live requests.

use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Remove.
    Delete,
}

impl Method {
    /// Returns true for methods that change server state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Method::Get)
    }

    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single live request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// Endpoint path, e.g. `/orders`.
    pub endpoint: String,
    /// Request method.
    pub method: Method,
    /// Optional JSON body.
    pub payload: Option<Value>,
}

impl TransportRequest {
    /// Creates a request.
    pub fn new(endpoint: impl Into<String>, method: Method, payload: Option<Value>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            payload,
        }
    }
}

/// A transport performs live network calls.
///
/// This trait abstracts the network layer, allowing for different implementations
/// (HTTP, mock for testing, etc.). The engine bounds every call with its own
/// timeout as well; `timeout` is passed through so clients can configure sockets.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and returns the decoded response body.
    async fn send(
        &self,
        request: &TransportRequest,
        timeout: Duration,
    ) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        request: &TransportRequest,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        (**self).send(request, timeout).await
    }
}

/// A mock transport for testing.
///
/// Requests that reach the mock "server" (the transport is connected) are
/// recorded in order. Responses can be scripted per method and endpoint;
/// unscripted requests answer `null`.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    attempts: AtomicU64,
    fail_next: AtomicU32,
    failure: Mutex<TransportError>,
    latency: Mutex<Option<Duration>>,
    responses: Mutex<HashMap<(Method, String), Value>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            attempts: AtomicU64::new(0),
            fail_next: AtomicU32::new(0),
            failure: Mutex::new(TransportError::Status {
                code: 503,
                message: "service unavailable".into(),
            }),
            latency: Mutex::new(None),
            responses: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sets the connected state. Disconnected calls fail as unreachable.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Scripts the response for a method and endpoint.
    pub fn set_response(&self, method: Method, endpoint: impl Into<String>, body: Value) {
        self.responses.lock().insert((method, endpoint.into()), body);
    }

    /// Makes the next `count` connected calls fail with the configured failure.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Sets the error returned by scripted failures.
    pub fn set_failure(&self, error: TransportError) {
        *self.failure.lock() = error;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Requests that reached the mock server, in arrival order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    /// Requests to a method and endpoint that reached the mock server.
    pub fn requests_to(&self, method: Method, endpoint: &str) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.endpoint == endpoint)
            .cloned()
            .collect()
    }

    /// Total calls, including those made while disconnected.
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    fn take_failure(&self) -> Option<TransportError> {
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        consumed.then(|| self.failure.lock().clone())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: &TransportRequest,
        _timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("network is down".into()));
        }

        self.requests.lock().push(request.clone());

        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        Ok(self
            .responses
            .lock()
            .get(&(request.method, request.endpoint.clone()))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn method_classification() {
        assert!(!Method::Get.is_mutation());
        assert!(Method::Post.is_mutation());
        assert!(Method::Put.is_mutation());
        assert!(Method::Delete.is_mutation());
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn method_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Method::Post).unwrap(), "\"POST\"");
        let method: Method = serde_json::from_str("\"PUT\"").unwrap();
        assert_eq!(method, Method::Put);
    }

    #[tokio::test]
    async fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let request = TransportRequest::new("/orders", Method::Post, Some(json!({"qty": 3})));
        let result = transport.send(&request, TIMEOUT).await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
        assert!(transport.requests().is_empty());
        assert_eq!(transport.attempt_count(), 1);
    }

    #[tokio::test]
    async fn mock_transport_scripted_response() {
        let transport = MockTransport::new();
        transport.set_response(Method::Get, "/weather/Arusha", json!({"temp": 24}));

        let request = TransportRequest::new("/weather/Arusha", Method::Get, None);
        let body = transport.send(&request, TIMEOUT).await.unwrap();
        assert_eq!(body, json!({"temp": 24}));

        let other = TransportRequest::new("/markets", Method::Get, None);
        assert_eq!(transport.send(&other, TIMEOUT).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn mock_transport_fail_next() {
        let transport = MockTransport::new();
        transport.fail_next(2);

        let request = TransportRequest::new("/orders", Method::Post, None);
        assert!(transport.send(&request, TIMEOUT).await.is_err());
        assert!(transport.send(&request, TIMEOUT).await.is_err());
        assert!(transport.send(&request, TIMEOUT).await.is_ok());
        assert_eq!(transport.requests_to(Method::Post, "/orders").len(), 3);
    }
}
