//! Payment ledger events.
//!
//! Every terminal verdict is published here exactly once per settled
//! payment; consumers (order fulfilment, accounting) subscribe through
//! [`crate::RunningService::subscribe_events`].

use crate::payment::{Amount, Chain, ConfirmationFailure};
use serde::Serialize;
use tokio::sync::broadcast;

/// Events emitted by the payment watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum PaymentEvent {
    /// Payment accepted.
    #[serde(rename = "PaymentConfirmed")]
    Confirmed {
        /// Chain it settled on.
        chain: Chain,
        /// Order it settles.
        order_id: String,
        /// Settling transaction.
        tx_hash: String,
        /// Amount received.
        amount: Amount,
        /// Including block.
        block_number: u64,
    },

    /// Payment refused.
    #[serde(rename = "PaymentRejected")]
    Rejected {
        /// Chain watched.
        chain: Chain,
        /// Order affected.
        order_id: String,
        /// Why.
        reason: ConfirmationFailure,
    },
}

impl PaymentEvent {
    /// Order the event concerns.
    #[must_use]
    pub fn order_id(&self) -> &str {
        match self {
            Self::Confirmed { order_id, .. } | Self::Rejected { order_id, .. } => order_id,
        }
    }
}

/// Channel for receiving payment events.
pub type PaymentEventsChannel = broadcast::Receiver<PaymentEvent>;

/// Sender for payment events.
pub type PaymentEventsSender = broadcast::Sender<PaymentEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (PaymentEventsSender, PaymentEventsChannel) {
    broadcast::channel(256)
}
