//! Confirmation outcomes.

use crate::payment::Amount;
use serde::Serialize;
use thiserror::Error;

/// Why a payment was not (yet) accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationFailure {
    /// Not buried deep enough yet.
    #[error("insufficient confirmation depth")]
    InsufficientDepth,

    /// The backing block no longer contains the transaction.
    #[error("transaction invalidated by reorg")]
    ReorgInvalidated,

    /// The explorer disagrees with the chain about the transaction.
    #[error("explorer corroboration failed")]
    CorroborationFailed,

    /// No qualifying payment before the expectation timed out.
    #[error("payment expectation expired")]
    Expired,

    /// Sent to the right address but below the accepted minimum.
    #[error("amount below accepted minimum")]
    AmountMismatch,
}

impl ConfirmationFailure {
    /// Whether a fresh watch on the same order may still succeed.
    ///
    /// A reorged or uncorroborated payment can be re-sent; an expired
    /// expectation cannot.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Expired)
    }
}

/// Result of evaluating an expectation against the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ConfirmationVerdict {
    /// A candidate exists but is not final, or none was seen yet.
    Pending {
        /// Depth of the current candidate, zero if none.
        confirmations: u64,
    },

    /// Accepted.
    Confirmed {
        /// Settling transaction.
        tx_hash: String,
        /// Block that includes it.
        block_number: u64,
        /// Amount actually received.
        amount: Amount,
    },

    /// Refused.
    Rejected {
        /// Why.
        reason: ConfirmationFailure,
    },
}

impl ConfirmationVerdict {
    /// Confirmed and Rejected end a watch.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }

    /// Whether the payment was accepted.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    /// Whether the verdict closes the order for good: confirmed, or rejected
    /// for a reason a fresh watch cannot overturn.
    #[must_use]
    pub const fn settles(&self) -> bool {
        match self {
            Self::Pending { .. } => false,
            Self::Confirmed { .. } => true,
            Self::Rejected { reason } => !reason.is_retryable(),
        }
    }

    /// Rejection reason, if rejected.
    #[must_use]
    pub const fn rejection(&self) -> Option<ConfirmationFailure> {
        match self {
            Self::Rejected { reason } => Some(*reason),
            _ => None,
        }
    }
}
