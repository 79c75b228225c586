//! # payguard
//!
//! Replay-safe request authentication and independent, reorg-aware payment
//! confirmation for cryptocurrency checkouts.
//!
//! Two subsystems enforce the core guarantees:
//! - [`auth`]: timestamp-windowed HMAC verification with per-request
//!   idempotency and fixed-window rate limiting. Nothing that can change
//!   payment state is reachable without passing through it.
//! - [`payment`]: a per-(chain, order) watcher that matches incoming
//!   transactions against an expected address and amount, waits for the
//!   chain's finality window, re-validates the backing block, and corroborates
//!   the result with an independent explorer before emitting a verdict.
//!
//! ## Architecture
//!
//! ```text
//! inbound request ──► RequestAuthenticator ──► (application)
//!                          │                        │
//!                          ▼                        ▼ register expectation
//!                   IdempotencyStore          PaymentWatcher ◄── HeadFeed (per chain)
//!                                                   │
//!                                   ChainClient ◄───┤───► ExplorerClient
//!                                                   ▼
//!                                         ConfirmationTracker
//!                                                   │
//!                                                   ▼
//!                                    PaymentEvent (ledger collaborator)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use payguard::{GuardConfig, ServiceBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GuardConfig::default();
//!     let mut service = ServiceBuilder::new(config).build().await?;
//!     service.run().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod chain;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod idempotency;
pub mod payment;
pub mod service;

pub use auth::{
    AuthError, AuthenticatedRequest, RateLimiter, Rejection, RequestAuthenticator, RequestSigner,
};
pub use chain::{Block, ChainClient, ChainTransaction, ExplorerClient, ExplorerTxInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, ChainConfig, GuardConfig, HmacSecret, WatcherConfig};
pub use error::{Error, Result};
pub use event::{PaymentEvent, PaymentEventsChannel};
pub use idempotency::{Fingerprint, IdempotencyStore, MemoryIdempotencyStore};
pub use payment::{
    Amount, CandidateTransaction, Chain, ChainPolicy, ConfirmationFailure, ConfirmationTracker,
    ConfirmationVerdict, PaymentExpectation, PaymentWatcher, Tolerance, WatchHandle, WatchKey,
};
pub use service::{RunningService, ServiceBuilder};
