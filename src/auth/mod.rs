//! Request authentication and replay defense.
//!
//! Every request that can change payment state passes through
//! [`RequestAuthenticator`] first.
//!
//! # Check order
//!
//! ```text
//! request ──► rate-limit gate ──► credentials present ──► timestamp window
//!                 │ 429                  │ 401                  │ 401
//!                                        ▼
//!                        replay lookup ──► HMAC (constant time) ──► record fingerprint
//!                            │ 401              │ 401
//! ```
//!
//! The caller never learns which 401 check failed; the reason is logged
//! server-side only.

mod authenticator;
mod rate_limit;
mod signing;

pub use authenticator::RequestAuthenticator;
pub use rate_limit::RateLimiter;
pub use signing::{canonical_body, canonical_string, sign, RequestSigner};

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// Header carrying the request timestamp (unix seconds, decimal).
pub const TIMESTAMP_HEADER: &str = "X-Request-Timestamp";

/// Header carrying the hex-encoded HMAC-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "X-Request-Signature";

/// Reasons an inbound request is refused.
///
/// Only [`AuthError::RateLimited`] is distinguishable to the caller; every
/// other variant renders as the same generic 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Signature or timestamp header missing or unparseable.
    #[error("missing credentials")]
    MissingCredentials,
    /// Timestamp further than the replay window from server time.
    #[error("timestamp outside replay window")]
    WindowExceeded,
    /// The request fingerprint was already accepted.
    #[error("replay detected")]
    ReplayDetected,
    /// Signature does not match the canonical string.
    #[error("invalid signature")]
    InvalidSignature,
    /// The client exhausted its bucket for the current window.
    #[error("rate limit exceeded")]
    RateLimited,
}

impl AuthError {
    /// HTTP status to return to the caller.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::RateLimited => 429,
            Self::MissingCredentials
            | Self::WindowExceeded
            | Self::ReplayDetected
            | Self::InvalidSignature => 401,
        }
    }

    /// Caller-facing rejection. Never reveals which 401 check failed.
    #[must_use]
    pub const fn rejection(self) -> Rejection {
        let error = match self {
            Self::RateLimited => "rate limit exceeded",
            Self::MissingCredentials
            | Self::WindowExceeded
            | Self::ReplayDetected
            | Self::InvalidSignature => "unauthorized",
        };
        Rejection {
            status: self.status_code(),
            body: ErrorBody { error },
        }
    }
}

/// Status code plus JSON body for a refused request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: ErrorBody,
}

/// Single-field JSON error object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Generic error class.
    pub error: &'static str,
}

impl Rejection {
    /// Render the body as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.body)
            .unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", self.body.error))
    }
}

/// An inbound request as seen by the authenticator.
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path (no scheme or host).
    pub path: String,
    /// Caller identity used for rate limiting (e.g. remote address).
    pub client: String,
    /// Raw `X-Request-Timestamp` header value.
    pub timestamp: Option<String>,
    /// Raw `X-Request-Signature` header value.
    pub signature: Option<String>,
    /// Request body exactly as received.
    pub body: Bytes,
}

impl AuthenticatedRequest {
    /// Build a request from raw headers. Header names match
    /// case-insensitively.
    pub fn from_headers<'a>(
        method: impl Into<String>,
        path: impl Into<String>,
        client: impl Into<String>,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
        body: impl Into<Bytes>,
    ) -> Self {
        let mut timestamp = None;
        let mut signature = None;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case(TIMESTAMP_HEADER) {
                timestamp = Some(value.trim().to_string());
            } else if name.eq_ignore_ascii_case(SIGNATURE_HEADER) {
                signature = Some(value.trim().to_string());
            }
        }

        Self {
            method: method.into(),
            path: path.into(),
            client: client.into(),
            timestamp,
            signature,
            body: body.into(),
        }
    }

    /// Parsed timestamp, if present and decimal.
    #[must_use]
    pub fn timestamp_secs(&self) -> Option<i64> {
        self.timestamp.as_deref()?.parse().ok()
    }
}
