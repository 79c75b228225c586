//! Idempotency tracking shared by request authentication and the payment
//! watcher.
//!
//! A [`Fingerprint`] identifies a logically-equivalent request or payment.
//! Stores remember fingerprints for a bounded retention window; inserting a
//! fingerprint that is already present is reported to the caller rather than
//! silently overwritten, which is what turns a duplicate into a detectable
//! replay.

mod store;
mod sweeper;

pub use store::{MemoryIdempotencyStore, StoreStats};
pub use sweeper::spawn_sweeper;

use sha2::{Digest, Sha256};
use std::fmt;

/// Domain tag for request fingerprints.
const REQUEST_DOMAIN: &[u8] = b"payguard.request.v1";

/// Domain tag for payment fingerprints.
const PAYMENT_DOMAIN: &[u8] = b"payguard.payment.v1";

/// 32-byte digest identifying a request or a confirmed payment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of an authenticated request.
    ///
    /// Covers the timestamp, method, path and body, so two deliveries of the
    /// same signed request are indistinguishable.
    #[must_use]
    pub fn for_request(timestamp: i64, method: &str, path: &str, body: &[u8]) -> Self {
        Self::digest(
            REQUEST_DOMAIN,
            &[
                timestamp.to_string().as_bytes(),
                method.to_ascii_uppercase().as_bytes(),
                path.as_bytes(),
                body,
            ],
        )
    }

    /// Fingerprint of a confirmed payment: `(chain, order_id, tx_hash)`.
    ///
    /// The transaction hash is case-folded since RPC providers disagree on
    /// hex casing.
    #[must_use]
    pub fn for_payment(chain: &str, order_id: &str, tx_hash: &str) -> Self {
        Self::digest(
            PAYMENT_DOMAIN,
            &[
                chain.as_bytes(),
                order_id.as_bytes(),
                tx_hash.to_ascii_lowercase().as_bytes(),
            ],
        )
    }

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    // Length-prefixed fields keep ("ab", "c") and ("a", "bc") distinct.
    fn digest(domain: &[u8], fields: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        for field in fields {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(&self.0[..8]))
    }
}

/// Storage for seen fingerprints with bounded retention.
///
/// Implementations must be linearizable: inserts and sweeps race from
/// concurrent request handlers and background ticks. Every operation must
/// complete without blocking on I/O so the authentication hot path never
/// stalls.
pub trait IdempotencyStore: Send + Sync {
    /// Whether the fingerprint is currently retained.
    fn contains(&self, fingerprint: &Fingerprint) -> bool;

    /// Record a fingerprint anchored at unix time `at`.
    ///
    /// Returns `false` if it was already present; the existing record is left
    /// untouched.
    fn insert(&self, fingerprint: Fingerprint, at: u64) -> bool;

    /// Remove every record whose age exceeds `window_secs`.
    ///
    /// Returns the number of records removed.
    fn sweep(&self, now: u64, window_secs: u64) -> usize;

    /// Remove at most `budget` expired records.
    ///
    /// Backends that expire records on their own may leave this as a no-op.
    fn sweep_bounded(&self, now: u64, window_secs: u64, budget: usize) -> usize {
        let _ = (now, window_secs, budget);
        0
    }

    /// Number of retained records.
    fn len(&self) -> usize;

    /// Whether no records are retained.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters since the store was created.
    fn stats(&self) -> StoreStats;
}

/// Whether a record anchored at `at` has outlived `window_secs` at `now`.
#[must_use]
pub(crate) const fn is_expired(at: u64, now: u64, window_secs: u64) -> bool {
    now.saturating_sub(at) > window_secs
}
