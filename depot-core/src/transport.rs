//! HTTP transport seam.
//!
//! The dispatcher never talks to `reqwest` directly; it hands a fully
//! prepared [`HttpRequest`] to a [`Transport`]. [`HttpTransport`] is the
//! production implementation. Tests substitute scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub use reqwest::Method;

/// A request ready to be put on the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A response that reached the client, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,

    /// Decoded body. JSON bodies are parsed; anything else is kept as a
    /// JSON string. `None` for empty bodies.
    pub body: Option<Value>,
}

impl RawResponse {
    /// Create a response with a JSON body.
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    /// Create a response without a body.
    pub fn empty(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure before any response reached the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The call did not complete within its configured timeout.
    #[error("request timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    /// The server could not be reached.
    #[error("connection failed: {message}")]
    Connect { message: String },

    /// Any other transport-level failure (TLS, malformed request, broken body).
    #[error("network error: {message}")]
    Network { message: String },
}

impl TransportError {
    /// Short machine-readable code surfaced as the envelope status.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "ETIMEDOUT",
            Self::Connect { .. } => "ECONNREFUSED",
            Self::Network { .. } => "ENETWORK",
        }
    }

    fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout { timeout }
        } else if error.is_connect() {
            Self::Connect {
                message: error.to_string(),
            }
        } else {
            Self::Network {
                message: error.to_string(),
            }
        }
    }
}

/// Performs one HTTP exchange.
///
/// Implementations must return `Ok` for every response that arrived,
/// including 4xx and 5xx; `Err` is reserved for calls that never got one.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<RawResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Network {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<RawResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(request.method, request.url)
            .timeout(timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        Ok(RawResponse {
            status,
            body: decode_body(&bytes),
        })
    }
}

fn decode_body(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}
