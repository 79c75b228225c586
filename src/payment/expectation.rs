//! Payment expectations and on-chain candidates.

use crate::chain::{Block, ChainTransaction};
use crate::error::{Error, Result};
use crate::payment::{Amount, Chain, Tolerance};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the service waits for: `expected_amount` (less tolerance) sent to
/// `expected_address` on `chain` for `order_id`.
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentExpectation {
    chain: Chain,
    order_id: String,
    expected_address: String,
    expected_amount: Amount,
    tolerance: Tolerance,
    created_at: u64,
}

impl PaymentExpectation {
    /// Create an expectation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExpectation`] if the order id or address is
    /// empty, or the expected amount is zero.
    pub fn new(
        chain: Chain,
        order_id: impl Into<String>,
        expected_address: impl Into<String>,
        expected_amount: Amount,
        tolerance: Tolerance,
        created_at: u64,
    ) -> Result<Self> {
        let order_id = order_id.into();
        let expected_address = expected_address.into().trim().to_string();

        if order_id.trim().is_empty() {
            return Err(Error::InvalidExpectation("order id is empty".to_string()));
        }
        if expected_address.is_empty() {
            return Err(Error::InvalidExpectation(
                "expected address is empty".to_string(),
            ));
        }
        if expected_amount == Amount::new(0) {
            return Err(Error::InvalidExpectation(
                "expected amount is zero".to_string(),
            ));
        }

        Ok(Self {
            chain,
            order_id,
            expected_address,
            expected_amount,
            tolerance,
            created_at,
        })
    }

    /// Chain the payment is expected on.
    #[must_use]
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Order this payment settles.
    #[must_use]
    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    /// Receiving address, as given.
    #[must_use]
    pub fn expected_address(&self) -> &str {
        &self.expected_address
    }

    /// Amount requested.
    #[must_use]
    pub fn expected_amount(&self) -> Amount {
        self.expected_amount
    }

    /// Allowed shortfall.
    #[must_use]
    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Creation time, Unix seconds.
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Smallest amount that satisfies this expectation.
    #[must_use]
    pub fn min_acceptable(&self) -> Amount {
        self.tolerance.min_acceptable(self.expected_amount)
    }

    /// Whether `timeout_secs` have elapsed since creation.
    #[must_use]
    pub fn is_expired(&self, now: u64, timeout_secs: u64) -> bool {
        now.saturating_sub(self.created_at) >= timeout_secs
    }

    /// Seconds until expiry, zero once expired.
    #[must_use]
    pub fn remaining_secs(&self, now: u64, timeout_secs: u64) -> u64 {
        self.created_at
            .saturating_add(timeout_secs)
            .saturating_sub(now)
    }

    /// Key identifying the watch for this expectation.
    #[must_use]
    pub fn key(&self) -> WatchKey {
        WatchKey(format!(
            "{}:{}:{}",
            self.chain,
            self.order_id,
            self.expected_address.to_ascii_lowercase()
        ))
    }
}

/// Idempotency key for a watch: `CHAIN:order_id:address`.
///
/// Two `watch` calls with the same key share one stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchKey(String);

impl WatchKey {
    /// Key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A transaction observed on chain that may settle an expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTransaction {
    /// Transaction hash.
    pub hash: String,
    /// Recipient.
    pub to_address: String,
    /// Value transferred.
    pub amount: Amount,
    /// Including block.
    pub block_number: u64,
    /// Including block's timestamp.
    pub block_timestamp: u64,
}

impl CandidateTransaction {
    /// Candidate for `tx` as included in `block`. Contract creations (no
    /// recipient) are never candidates.
    #[must_use]
    pub fn from_block(tx: &ChainTransaction, block: &Block) -> Option<Self> {
        let to_address = tx.to.clone()?;
        Some(Self {
            hash: tx.hash.clone(),
            to_address,
            amount: tx.value,
            block_number: block.number,
            block_timestamp: block.timestamp,
        })
    }
}
