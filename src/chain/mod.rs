//! Read-only blockchain access.
//!
//! Two independent capabilities are consumed:
//! - [`ChainClient`]: the primary node view (blocks, transactions, head).
//! - [`ExplorerClient`]: an independently operated explorer used to
//!   corroborate what the node reports.
//!
//! Neither ever signs or sends anything.

mod explorer;
mod feed;
pub mod memory;
mod rpc;

pub use explorer::BlockscoutExplorer;
pub use feed::{HeadFeeds, HeadSubscription};
pub use rpc::JsonRpcChainClient;

use crate::error::Result;
use crate::payment::Amount;
use async_trait::async_trait;

/// A transaction as reported by a [`ChainClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    /// Transaction hash (hex, `0x`-prefixed).
    pub hash: String,
    /// Recipient, `None` for contract creation.
    pub to: Option<String>,
    /// Transferred value in base units.
    pub value: Amount,
    /// Including block, `None` while pending.
    pub block_number: Option<u64>,
}

/// A block with its full transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block height.
    pub number: u64,
    /// Block hash.
    pub hash: String,
    /// Block timestamp (unix seconds).
    pub timestamp: u64,
    /// Transactions in block order.
    pub transactions: Vec<ChainTransaction>,
}

impl Block {
    /// Whether the block includes a transaction with `hash`.
    #[must_use]
    pub fn contains_tx(&self, hash: &str) -> bool {
        self.transactions
            .iter()
            .any(|tx| tx.hash.eq_ignore_ascii_case(hash))
    }
}

/// Execution status reported by an explorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorerStatus {
    /// Included and executed successfully.
    Success,
    /// Included but reverted / failed.
    Failed,
    /// The explorer does not know the transaction.
    NotFound,
}

/// Explorer view of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplorerTxInfo {
    /// Reported status.
    pub status: ExplorerStatus,
    /// Reported including block.
    pub block_number: Option<u64>,
}

impl ExplorerTxInfo {
    /// A successful transaction in `block_number`.
    #[must_use]
    pub const fn success(block_number: u64) -> Self {
        Self {
            status: ExplorerStatus::Success,
            block_number: Some(block_number),
        }
    }

    /// A transaction the explorer has never seen.
    #[must_use]
    pub const fn not_found() -> Self {
        Self {
            status: ExplorerStatus::NotFound,
            block_number: None,
        }
    }
}

/// Minimal read-only node access.
///
/// Implementations are shared across every watch on a chain and must not
/// hold locks across awaits.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetch block `number` with full transactions. `Ok(None)` if the node
    /// does not have it.
    async fn get_block(&self, number: u64) -> Result<Option<Block>>;

    /// Fetch a transaction by hash. `Ok(None)` if unknown.
    async fn get_transaction(&self, hash: &str) -> Result<Option<ChainTransaction>>;

    /// Current head height.
    async fn head_height(&self) -> Result<u64>;
}

/// Independent corroboration source.
#[async_trait]
pub trait ExplorerClient: Send + Sync {
    /// Status and block position of a transaction.
    async fn tx_info(&self, hash: &str) -> Result<ExplorerTxInfo>;
}
