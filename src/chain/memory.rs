//! In-memory chain and explorer for tests and local development.
//!
//! Both types are cheap to clone; clones share state, so a test can keep a
//! handle to mutate the chain (mine, reorg, drop blocks) while the watcher
//! reads from another.

use crate::chain::{Block, ChainClient, ChainTransaction, ExplorerClient, ExplorerTxInfo};
use crate::error::{Error, Result};
use crate::payment::Amount;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A simple in-memory chain, starting with an empty genesis block.
#[derive(Clone)]
pub struct InMemoryChain {
    inner: Arc<RwLock<ChainState>>,
}

#[derive(Default)]
struct ChainState {
    blocks: BTreeMap<u64, Block>,
    head: u64,
    unavailable: bool,
}

impl InMemoryChain {
    /// Chain holding only genesis, at height 0.
    #[must_use]
    pub fn new() -> Self {
        let mut state = ChainState::default();
        state.blocks.insert(0, make_block(0, Vec::new()));
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Build a transfer transaction.
    #[must_use]
    pub fn transfer(hash: &str, to: &str, value: u128) -> ChainTransaction {
        ChainTransaction {
            hash: hash.to_string(),
            to: Some(to.to_string()),
            value: Amount::new(value),
            block_number: None,
        }
    }

    /// Mine a block on top of the current head; returns its height.
    pub fn mine(&self, transactions: Vec<ChainTransaction>) -> u64 {
        let mut state = self.inner.write();
        let number = state.head + 1;
        state.blocks.insert(number, make_block(number, transactions));
        state.head = number;
        number
    }

    /// Mine `count` empty blocks; returns the new head.
    pub fn mine_empty(&self, count: u64) -> u64 {
        let mut head = self.head();
        for _ in 0..count {
            head = self.mine(Vec::new());
        }
        head
    }

    /// Replace the contents of block `number` (reorg simulation).
    pub fn replace_block(&self, number: u64, transactions: Vec<ChainTransaction>) {
        let mut state = self.inner.write();
        state.blocks.insert(number, make_block(number, transactions));
        state.head = state.head.max(number);
    }

    /// Forget block `number`.
    pub fn remove_block(&self, number: u64) {
        self.inner.write().blocks.remove(&number);
    }

    /// Current head height.
    #[must_use]
    pub fn head(&self) -> u64 {
        self.inner.read().head
    }

    /// Make every call fail until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().unavailable = unavailable;
    }

    fn check_available(state: &ChainState) -> Result<()> {
        if state.unavailable {
            return Err(Error::Chain("in-memory chain unavailable".to_string()));
        }
        Ok(())
    }
}

fn make_block(number: u64, transactions: Vec<ChainTransaction>) -> Block {
    let transactions = transactions
        .into_iter()
        .map(|tx| ChainTransaction {
            block_number: Some(number),
            ..tx
        })
        .collect();

    Block {
        number,
        hash: format!("0x{number:064x}"),
        timestamp: 1_700_000_000 + number * 12,
        transactions,
    }
}

impl Default for InMemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for InMemoryChain {
    async fn get_block(&self, number: u64) -> Result<Option<Block>> {
        let state = self.inner.read();
        Self::check_available(&state)?;
        Ok(state.blocks.get(&number).cloned())
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<ChainTransaction>> {
        let state = self.inner.read();
        Self::check_available(&state)?;
        Ok(state
            .blocks
            .values()
            .flat_map(|block| block.transactions.iter())
            .find(|tx| tx.hash.eq_ignore_ascii_case(hash))
            .cloned())
    }

    async fn head_height(&self) -> Result<u64> {
        let state = self.inner.read();
        Self::check_available(&state)?;
        Ok(state.head)
    }
}

/// A scripted explorer.
#[derive(Clone, Default)]
pub struct InMemoryExplorer {
    inner: Arc<RwLock<ExplorerState>>,
}

#[derive(Default)]
struct ExplorerState {
    records: HashMap<String, ExplorerTxInfo>,
    unavailable: bool,
}

impl InMemoryExplorer {
    /// Explorer that knows nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the answer for `hash`.
    pub fn set(&self, hash: &str, info: ExplorerTxInfo) {
        self.inner
            .write()
            .records
            .insert(hash.to_ascii_lowercase(), info);
    }

    /// Make every call fail until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().unavailable = unavailable;
    }
}

#[async_trait]
impl ExplorerClient for InMemoryExplorer {
    async fn tx_info(&self, hash: &str) -> Result<ExplorerTxInfo> {
        let state = self.inner.read();
        if state.unavailable {
            return Err(Error::Explorer("in-memory explorer unavailable".to_string()));
        }
        Ok(state
            .records
            .get(&hash.to_ascii_lowercase())
            .copied()
            .unwrap_or_else(ExplorerTxInfo::not_found))
    }
}
