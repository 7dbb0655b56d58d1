//! `reqwest` implementation of the HTTP transport seam.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use solace_core::gateway::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};

/// Sends requests to the backend over HTTPS.
///
/// One shared connection pool per transport; the per-request timeout comes
/// from the request itself, so the gateway's retry policy stays in charge.
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn method_for(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn classify(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(Self::method_for(request.method), self.url_for(&request.endpoint))
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(Self::classify)?;
        let status = response.status().as_u16();
        // Error bodies still carry useful messages; an empty or non-JSON
        // body becomes null rather than a transport failure.
        let body = response.json::<Value>().await.unwrap_or(Value::Null);

        Ok(HttpResponse { status, body })
    }
}
