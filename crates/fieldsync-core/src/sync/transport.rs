//! Network seam used by the sync processor.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::models::{HttpMethod, OperationRequest};
use crate::util::{is_http_url, normalize_text_option};

/// Status and decoded body of a server reply.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// JSON body, or `Value::Null` when the body is empty or not JSON
    pub body: Value,
    /// Raw body text, kept for diagnostics
    pub text: String,
}

impl TransportResponse {
    pub fn json(status: u16, body: Value) -> Self {
        let text = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        Self { status, body, text }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Failure to obtain any response from the server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    /// The request can never be sent as stored (bad URL, unencodable body)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }
}

/// Submits one queued operation to the server.
#[allow(async_fn_in_trait)]
pub trait SyncTransport {
    async fn send(&self, request: &OperationRequest) -> Result<TransportResponse, TransportError>;
}

/// `SyncTransport` backed by `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .ok_or_else(|| TransportError::InvalidRequest("API base URL is empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(TransportError::InvalidRequest(format!(
                "API base URL must include http:// or https://: {base_url}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TransportError::Network(error.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    /// Join a stored operation URL onto the base URL unless it is absolute.
    pub fn resolve_url(&self, url: &str) -> String {
        if is_http_url(url) {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    fn map_error(&self, error: &reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if error.is_builder() {
            TransportError::InvalidRequest(error.to_string())
        } else {
            TransportError::Network(error.to_string())
        }
    }
}

impl SyncTransport for HttpTransport {
    async fn send(&self, request: &OperationRequest) -> Result<TransportResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let url = self.resolve_url(&request.url);

        let mut builder = self
            .client
            .request(method, &url)
            .header("Accept", "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(&e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.map_error(&e))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);

        tracing::debug!("{} {url} -> {status}", request.method);
        Ok(TransportResponse { status, body, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new("https://api.example.com/v1/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn relative_urls_join_base() {
        let transport = transport();
        assert_eq!(
            transport.resolve_url("/orders/42"),
            "https://api.example.com/v1/orders/42"
        );
        assert_eq!(
            transport.resolve_url("orders/42"),
            "https://api.example.com/v1/orders/42"
        );
        assert_eq!(
            transport.resolve_url("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn base_url_must_be_http() {
        assert!(HttpTransport::new("", Duration::from_secs(1)).is_err());
        assert!(HttpTransport::new("api.example.com", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn invalid_request_is_not_retryable() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad url".into()).is_retryable());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_host_is_a_network_error() {
        let transport =
            HttpTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let request = OperationRequest {
            method: HttpMethod::Put,
            url: "/orders/42".to_string(),
            body: None,
        };
        let error = transport.send(&request).await.unwrap_err();
        assert!(error.is_retryable());
    }
}
