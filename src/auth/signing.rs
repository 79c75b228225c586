//! Canonical string construction and HMAC-SHA256 signing.
//!
//! The canonical string binds the timestamp, method, path and body by plain
//! concatenation, with no separators:
//!
//! ```text
//! {timestamp}{METHOD}{path}{body bytes}
//! ```
//!
//! Changing any one component changes the signature, so a captured
//! signature cannot be reused with a substituted payload. The layout is the
//! wire contract shared with existing clients; replay fingerprints are
//! length-prefixed separately (see [`crate::idempotency::Fingerprint`]).

use crate::auth::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::config::HmacSecret;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Build the canonical string for a request.
#[must_use]
pub fn canonical_string(timestamp: i64, method: &str, path: &str, body: &[u8]) -> Vec<u8> {
    let header = format!("{timestamp}{}{path}", method.to_ascii_uppercase());
    let mut canonical = Vec::with_capacity(header.len() + body.len());
    canonical.extend_from_slice(header.as_bytes());
    canonical.extend_from_slice(body);
    canonical
}

/// Deterministic JSON serialization of a body: object keys sorted, no
/// insignificant whitespace.
#[must_use]
pub fn canonical_body(value: &serde_json::Value) -> Vec<u8> {
    fn sorted(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                serde_json::Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), sorted(v)))
                        .collect(),
                )
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sorted).collect())
            }
            other => other.clone(),
        }
    }

    serde_json::to_vec(&sorted(value)).unwrap_or_default()
}

pub(crate) fn mac_for(secret: &[u8], canonical: &[u8]) -> HmacSha256 {
    // HMAC takes keys of any length, so the fallback is never reached.
    let mut mac = HmacSha256::new_from_slice(secret)
        .unwrap_or_else(|_| HmacSha256::new(&Default::default()));
    mac.update(canonical);
    mac
}

/// Hex-encoded HMAC-SHA256 over the canonical string.
#[must_use]
pub fn sign(secret: &[u8], timestamp: i64, method: &str, path: &str, body: &[u8]) -> String {
    let canonical = canonical_string(timestamp, method, path, body);
    hex::encode(mac_for(secret, &canonical).finalize().into_bytes())
}

/// Client-side helper producing authentication headers.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    secret: HmacSecret,
}

impl RequestSigner {
    /// Create a signer for `secret`.
    #[must_use]
    pub fn new(secret: HmacSecret) -> Self {
        Self { secret }
    }

    /// Headers `(name, value)` for a request sent at `timestamp`.
    #[must_use]
    pub fn headers(
        &self,
        timestamp: i64,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> [(&'static str, String); 2] {
        [
            (TIMESTAMP_HEADER, timestamp.to_string()),
            (
                SIGNATURE_HEADER,
                sign(self.secret.as_bytes(), timestamp, method, path, body),
            ),
        ]
    }
}
