//! Error types for payguard.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in payguard.
///
/// Authentication outcomes and confirmation outcomes are reported through
/// their own types ([`crate::AuthError`], [`crate::ConfirmationFailure`]);
/// this enum covers infrastructure failures around them.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Chain RPC error (transport, decoding, or node-side error).
    #[error("chain error: {0}")]
    Chain(String),

    /// Block explorer error (transport or decoding).
    #[error("explorer error: {0}")]
    Explorer(String),

    /// No chain client is registered for the requested chain.
    #[error("no client registered for chain {0}")]
    UnknownChain(String),

    /// A payment expectation failed validation.
    #[error("invalid payment expectation: {0}")]
    InvalidExpectation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The service is shutting down.
    #[error("service is shutting down")]
    ShuttingDown,
}
