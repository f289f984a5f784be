//! HTTP transport backed by reqwest.

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::transport::{Transport, TransportRequest, TransportResponse};
use fieldline_common::{Error, HttpMethod, Result};

/// Default timeout applied to requests without their own.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Production transport that sends requests over HTTP.
///
/// Relative endpoints resolve against the base URL; absolute URLs pass
/// through unchanged. When configured with a bearer token it is attached
/// to every request.
pub struct HttpTransport {
    http: Client,
    base_url: Url,
    bearer_token: Option<String>,
    default_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport resolving endpoints against `base_url`.
    ///
    /// # Errors
    /// - Unparseable base URL
    /// - HTTP client construction failure
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let mut base_url = Url::parse(base_url.as_ref())
            .map_err(|e| Error::InvalidInput(format!("Invalid base URL: {}", e)))?;

        // A trailing slash keeps Url::join from replacing the last path segment
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let http = Client::builder()
            .user_agent("FieldLine/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            bearer_token: None,
            default_timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Attach a bearer token to every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set the timeout applied when a request carries none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Resolve an endpoint to a full URL.
    fn url_for(&self, endpoint: &str) -> Result<Url> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Url::parse(endpoint)
                .map_err(|e| Error::InvalidInput(format!("Invalid endpoint URL: {}", e)));
        }
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| Error::InvalidInput(format!("Invalid endpoint {}: {}", endpoint, e)))
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Map a response onto the transport contract.
async fn handle_response(response: reqwest::Response) -> Result<TransportResponse> {
    let status = response.status();

    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(Error::Http {
            status: status.as_u16(),
            message,
        });
    }

    let body = if status == StatusCode::NO_CONTENT {
        Value::Null
    } else {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response body: {}", e)))?;
        if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| Error::Serialization(e.to_string()))?
        }
    };

    Ok(TransportResponse {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let url = self.url_for(&request.endpoint)?;

        let mut builder = self
            .http
            .request(to_reqwest_method(request.method), url)
            .timeout(request.timeout.unwrap_or(self.default_timeout));

        if let Some(token) = &self.bearer_token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            Error::Network(format!("Request to {} failed: {}", request.endpoint, e))
        })?;

        handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining_keeps_base_path() {
        let transport = HttpTransport::new("https://api.example.com/v1").unwrap();

        let url = transport.url_for("/activities").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/activities");

        let url = transport.url_for("documents/42").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/documents/42");
    }

    #[test]
    fn test_absolute_endpoints_pass_through() {
        let transport = HttpTransport::new("https://api.example.com/v1").unwrap();

        let url = transport.url_for("https://other.example.com/health").unwrap();
        assert_eq!(url.as_str(), "https://other.example.com/health");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(HttpTransport::new("not a url").is_err());
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(to_reqwest_method(HttpMethod::Get), Method::GET);
        assert_eq!(to_reqwest_method(HttpMethod::Head), Method::HEAD);
        assert_eq!(to_reqwest_method(HttpMethod::Delete), Method::DELETE);
    }
}
