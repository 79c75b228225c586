//! End-to-end tests for payguard.
//!
//! Each test builds a full service over in-memory chain and explorer doubles
//! and a manual clock, then drives it the way a checkout backend would.

mod auth_flow;
mod harness;
mod payment_flow;

pub use harness::{TestHarness, NOW};
