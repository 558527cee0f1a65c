//! HTTP transport used by the connector.
//!
//! The connector never talks to `reqwest` directly. It builds an
//! [`HttpRequest`] and hands it to an [`HttpTransport`], which makes the
//! exchange replaceable in tests and in deployments with their own HTTP
//! stack.

use std::time::Duration;

use async_trait::async_trait;
use authkeep_core::OAuthError;

/// HTTP methods used by OAuth exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A fully assembled request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// A POST with a form-encoded body.
    pub fn post_form(url: impl Into<String>, body: String, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![(
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: Some(body),
            timeout,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decoded form fields of the body.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        self.body
            .as_deref()
            .map(|body| {
                url::form_urlencoded::parse(body.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Value of a single form field.
    pub fn form_field(&self, name: &str) -> Option<String> {
        self.form_fields()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Failures below the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Exchange interrupted: {0}")]
    Interrupted(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<TransportError> for OAuthError {
    fn from(err: TransportError) -> Self {
        OAuthError::transport(err.to_string(), err.is_timeout())
    }
}

/// Issues a single HTTP exchange.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request` and return status and body.
    ///
    /// Any HTTP status is a successful exchange; only failures to complete
    /// the exchange are errors.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] on timeout, connection failure or an
    /// interrupted body.
    async fn issue(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by `reqwest`.
///
/// Idle connections are not kept: token endpoints are called rarely and a
/// stale pooled connection is more likely than a useful one.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Uses a preconfigured client (proxies, custom roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() || err.is_request() {
            TransportError::Interrupted(err.to_string())
        } else {
            TransportError::Client(err.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn issue(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        }
        .timeout(timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        Ok(HttpResponse { status, body })
    }
}
