//! HTTP transport seam.
//!
//! The gateway and the auth manager talk to the backend through
//! [`HttpTransport`] only. The concrete `reqwest` adapter lives in the
//! infrastructure crate; tests script responses through mock implementations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default per-request timeout enforced by the transport.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP method subset used by the backend API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Mutating methods are the ones eligible for offline queueing.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// A single outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub endpoint: String,
    pub method: Method,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            body: None,
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attaches an `Authorization: Bearer <token>` header.
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {token}"))
    }
}

/// A response that made it back from the backend, success or not.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Best-effort human-readable message from an error body.
    pub fn error_message(&self) -> String {
        self.body
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .or_else(|| self.body.get("message"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

/// Failure to obtain any response at all. Every variant is network-classified.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Executes a single HTTP exchange. No retries, no queueing; classification
/// of failures into the error taxonomy happens in the gateway.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mutating_methods() {
        assert!(Method::Post.is_mutating());
        assert!(Method::Put.is_mutating());
        assert!(Method::Patch.is_mutating());
        assert!(!Method::Get.is_mutating());
        assert!(!Method::Delete.is_mutating());
    }

    #[test]
    fn test_bearer_header() {
        let request = HttpRequest::new(Method::Get, "/user/profile").with_bearer("tok-1");
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "Bearer tok-1".to_string())]
        );
    }

    #[test]
    fn test_error_message_extraction() {
        let response = HttpResponse {
            status: 422,
            body: json!({"error": {"message": "intensity out of range"}}),
        };
        assert_eq!(response.error_message(), "intensity out of range");

        let bare = HttpResponse {
            status: 500,
            body: json!({}),
        };
        assert_eq!(bare.error_message(), "HTTP 500");
    }
}
