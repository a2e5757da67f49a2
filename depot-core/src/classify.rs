//! Failure classification.
//!
//! [`classify`] decides what the dispatcher does with a failed call;
//! [`ErrorKind`] names the failure for logging and notification rules.

use crate::transport::{RawResponse, TransportError};

/// Status code signalling a missing or expired access credential.
pub const UNAUTHENTICATED: u16 = 401;

/// Status code of rate-limited calls. These never reach the notifier.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Structured representation of a failed call.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// A response arrived with a non-2xx status.
    Status(RawResponse),
    /// No response arrived.
    Transport(TransportError),
}

impl Failure {
    /// HTTP status, if a response arrived.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(raw) => Some(raw.status),
            Self::Transport(_) => None,
        }
    }

    fn is_unauthenticated(&self) -> bool {
        self.status() == Some(UNAUTHENTICATED)
    }
}

/// What the dispatcher should do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Surface the failure as-is.
    NonAuth,
    /// Tear the session down, then surface the failure.
    Terminal,
    /// Refresh the credential and replay the call once.
    RefreshEligible,
}

/// Classify a failure.
///
/// A 401 is refresh-eligible only on a first attempt that is not itself the
/// refresh call; any other 401 is terminal. Everything else, including
/// timeouts and connection failures, is non-auth.
pub fn classify(failure: &Failure, retried: bool, is_refresh_call: bool) -> Classification {
    if !failure.is_unauthenticated() {
        return Classification::NonAuth;
    }

    if retried || is_refresh_call {
        Classification::Terminal
    } else {
        Classification::RefreshEligible
    }
}

/// Kinds of failure a caller may observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No response reached the client (timeout, connection failure).
    Transport,
    /// 4xx other than 401 and 429.
    Client,
    /// 401 that will be recovered by a refresh.
    AuthExpired,
    /// 401 that ends the session.
    AuthTerminal,
    /// 429.
    RateLimited,
    /// 5xx.
    Server,
}

impl ErrorKind {
    /// Name the failure given how it was classified.
    pub fn of(failure: &Failure, classification: Classification) -> Self {
        match failure.status() {
            None => Self::Transport,
            Some(UNAUTHENTICATED) if classification == Classification::RefreshEligible => {
                Self::AuthExpired
            }
            Some(UNAUTHENTICATED) => Self::AuthTerminal,
            Some(TOO_MANY_REQUESTS) => Self::RateLimited,
            Some(status) if status >= 500 => Self::Server,
            Some(_) => Self::Client,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Client => "client",
            Self::AuthExpired => "auth_expired",
            Self::AuthTerminal => "auth_terminal",
            Self::RateLimited => "rate_limited",
            Self::Server => "server",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
