//! Payment confirmation.
//!
//! A payment is accepted only when all of the following hold:
//! 1. A transaction to the expected address carries at least the expected
//!    amount minus the tolerance
//! 2. It is buried under the chain's required confirmations
//! 3. Its block is re-fetched and still contains it (reorg check)
//! 4. An independent explorer reports the same block and a successful status
//!
//! # Architecture
//!
//! ```text
//! watch(expectation)
//!        │
//!        ▼
//! ┌─────────────────────┐     head changes      ┌──────────┐
//! │ WatchTask (1/order) │ ◄──────────────────── │ HeadFeed │ (1/chain)
//! └─────────┬───────────┘                       └──────────┘
//!           │ scan new blocks, keep first qualifying candidate
//!           ▼
//! ┌─────────────────────┐
//! │ ConfirmationTracker │── depth ── reorg re-fetch ── explorer
//! └─────────┬───────────┘
//!           │
//!    ┌──────┼───────────┐
//!    │      │           │
//! Pending Confirmed  Rejected
//!    │      │           │
//!    ▼      ▼           ▼
//!  keep   PaymentEvent (ledger)
//!  polling
//! ```

mod expectation;
mod tracker;
mod types;
mod verdict;
mod watcher;

pub use expectation::{CandidateTransaction, PaymentExpectation, WatchKey};
pub use tracker::{CandidateMatch, ConfirmationTracker};
pub use types::{Amount, Chain, ChainPolicy, Tolerance};
pub use verdict::{ConfirmationFailure, ConfirmationVerdict};
pub use watcher::{PaymentWatcher, WatchHandle, WatchStatus};
