//! Remote-call seam between the engine and the backend.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use fieldline_common::{HttpMethod, Result};

/// One request handed to the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Endpoint path, or an absolute URL.
    pub endpoint: String,
    /// Method to send with.
    pub method: HttpMethod,
    /// JSON body, when the method carries one.
    pub body: Option<Value>,
    /// Extra headers.
    pub headers: HashMap<String, String>,
    /// Per-request timeout override.
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    /// Create a request with no body, headers, or timeout override.
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            body: None,
            headers: HashMap::new(),
            timeout: None,
        }
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach one header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Override the transport's default timeout for this request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A decoded success response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body. `Value::Null` when the response had no body.
    pub body: Value,
}

/// Remote-call collaborator owned by the embedding application.
///
/// Implementations own connection management and authentication token
/// attachment/refresh. The engine never inspects endpoints to guess
/// intent; it only sends what it is given.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and decode the response.
    ///
    /// # Errors
    /// - `Network` when no response was obtained
    /// - `Http` when the remote answered with a non-success status
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}
