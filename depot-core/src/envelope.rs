//! Uniform result envelope and the normalizer that produces it.
//!
//! Every dispatched call, successful or not, ends up as an [`Envelope`].
//! Nothing else crosses the dispatcher boundary.

use serde::Serialize;
use serde_json::Value;

use crate::classify::Failure;
use crate::transport::RawResponse;

/// Status reported in an envelope: the HTTP status when a response arrived,
/// or a transport error code such as `"ETIMEDOUT"` when none did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusCode {
    Http(u16),
    Code(String),
}

impl StatusCode {
    /// The HTTP status, if this is one.
    pub fn as_http(&self) -> Option<u16> {
        match self {
            Self::Http(status) => Some(*status),
            Self::Code(_) => None,
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(status) => write!(f, "{}", status),
            Self::Code(code) => f.write_str(code),
        }
    }
}

/// The only result shape callers outside the pipeline ever see.
///
/// Serializes as `{success, error, data, statusCode, message}`. `error` is
/// always the negation of `success`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    success: bool,
    error: bool,
    data: Value,
    status_code: Option<StatusCode>,
    message: Option<String>,
}

impl Envelope {
    fn new(
        success: bool,
        data: Value,
        status_code: Option<StatusCode>,
        message: Option<String>,
    ) -> Self {
        Self {
            success,
            error: !success,
            data,
            status_code,
            message,
        }
    }

    /// Build a failure envelope that did not come from a transport result.
    pub fn failure(status_code: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self::new(false, Value::Null, status_code, Some(message.into()))
    }

    pub(crate) fn local_success(message: impl Into<String>) -> Self {
        Self::new(true, Value::Null, None, Some(message.into()))
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn status_code(&self) -> Option<&StatusCode> {
        self.status_code.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Normalize a response that arrived with a 2xx status.
///
/// The body's own `success` flag wins when present; the envelope's `data` is
/// the body's `data` field, or the whole body when it has none.
pub fn normalize(raw: &RawResponse) -> Envelope {
    let body = raw.body.as_ref();

    let success = body
        .and_then(|b| b.get("success"))
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let data = match body {
        Some(Value::Object(map)) => map
            .get("data")
            .cloned()
            .unwrap_or_else(|| Value::Object(map.clone())),
        Some(other) => other.clone(),
        None => Value::Null,
    };

    let message = body.and_then(|b| string_field(b, "message"));

    Envelope::new(success, data, Some(StatusCode::Http(raw.status)), message)
}

/// Normalize a failed call into a failure envelope.
pub fn normalize_error(failure: &Failure) -> Envelope {
    match failure {
        Failure::Status(raw) => {
            let body = raw.body.as_ref();
            let data = body
                .and_then(|b| b.get("data"))
                .cloned()
                .unwrap_or(Value::Null);
            let message = body
                .and_then(|b| string_field(b, "message").or_else(|| string_field(b, "error")))
                .or_else(|| match body {
                    Some(Value::String(text)) if !text.trim().is_empty() => {
                        Some(text.trim().to_string())
                    }
                    _ => None,
                })
                .unwrap_or_else(|| reason_phrase(raw.status));

            Envelope::new(false, data, Some(StatusCode::Http(raw.status)), Some(message))
        }
        Failure::Transport(error) => Envelope::new(
            false,
            Value::Null,
            Some(StatusCode::Code(error.code().to_string())),
            Some(error.to_string()),
        ),
    }
}

fn string_field(body: &Value, field: &str) -> Option<String> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn reason_phrase(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Request failed with status code {}", status))
}
