//! Per-order watch loops.
//!
//! Each [`PaymentExpectation`] gets one task that follows its chain's head
//! feed, scans new blocks for a qualifying transaction, and re-evaluates it
//! with the chain's [`ConfirmationTracker`] until a terminal verdict, expiry,
//! or cancellation. Watches are keyed by [`WatchKey`]: registering the same
//! expectation twice joins the running stream instead of starting another.
//!
//! A key that settled (confirmed, or rejected for good) is remembered. Watching
//! it again replays the final verdict on a finished handle and emits no ledger
//! event, so a paid order can never later be reported as expired. A reorged
//! payment does not settle its key and can be re-armed.

use crate::chain::{ChainClient, ExplorerClient, HeadFeeds, HeadSubscription};
use crate::clock::Clock;
use crate::config::WatcherConfig;
use crate::error::{Error, Result};
use crate::event::{PaymentEvent, PaymentEventsSender};
use crate::idempotency::{Fingerprint, IdempotencyStore};
use crate::payment::{
    CandidateMatch, CandidateTransaction, Chain, ChainPolicy, ConfirmationFailure,
    ConfirmationTracker, ConfirmationVerdict, PaymentExpectation, WatchKey,
};
use futures::stream::{self, Stream};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Latest state of a watch, as seen by its handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchStatus {
    /// Registered, nothing evaluated yet.
    Starting,
    /// Most recent verdict. Terminal verdicts are final.
    Update(ConfirmationVerdict),
    /// Stopped by cancellation or shutdown without a verdict.
    Cancelled,
}

impl WatchStatus {
    /// Whether no further updates will follow.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        match self {
            Self::Starting => false,
            Self::Update(verdict) => verdict.is_terminal(),
            Self::Cancelled => true,
        }
    }
}

#[derive(Clone)]
struct ChainBackend {
    client: Arc<dyn ChainClient>,
    tracker: Arc<ConfirmationTracker>,
}

struct ActiveWatch {
    id: u64,
    status: watch::Receiver<WatchStatus>,
    cancel: Arc<watch::Sender<bool>>,
}

struct Shared {
    config: WatcherConfig,
    clock: Arc<dyn Clock>,
    processed: Arc<dyn IdempotencyStore>,
    events: PaymentEventsSender,
    backends: RwLock<HashMap<Chain, ChainBackend>>,
    // Lock order: `active` before `settled`.
    active: Mutex<HashMap<WatchKey, ActiveWatch>>,
    settled: Mutex<LruCache<WatchKey, ConfirmationVerdict>>,
    feeds: HeadFeeds,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    next_id: AtomicU64,
}

/// Registry of payment watches.
///
/// Cheap to clone; clones share every watch.
#[derive(Clone)]
pub struct PaymentWatcher {
    shared: Arc<Shared>,
}

impl PaymentWatcher {
    /// Create a watcher.
    ///
    /// `processed` records settled payments so a re-armed or duplicate watch
    /// never emits a second `PaymentConfirmed` for the same transaction.
    #[must_use]
    pub fn new(
        config: WatcherConfig,
        clock: Arc<dyn Clock>,
        processed: Arc<dyn IdempotencyStore>,
        events: PaymentEventsSender,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settled_capacity =
            NonZeroUsize::new(config.settled_capacity).unwrap_or(NonZeroUsize::MIN);
        let feeds = HeadFeeds::new(
            Duration::from_millis(config.poll_interval_ms),
            shutdown_rx.clone(),
        );

        Self {
            shared: Arc::new(Shared {
                config,
                clock,
                processed,
                events,
                backends: RwLock::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                settled: Mutex::new(LruCache::new(settled_capacity)),
                feeds,
                shutdown_tx,
                shutdown_rx,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Make `chain` watchable. Replaces any earlier registration; running
    /// watches keep the backend they started with.
    pub fn register_chain(
        &self,
        chain: Chain,
        policy: ChainPolicy,
        client: Arc<dyn ChainClient>,
        explorer: Arc<dyn ExplorerClient>,
    ) {
        info!(
            "Registered chain {} ({} confirmations, reorg depth {})",
            chain, policy.required_confirmations, policy.reorg_depth
        );
        let tracker = Arc::new(ConfirmationTracker::new(
            policy,
            Arc::clone(&client),
            explorer,
        ));
        self.shared
            .backends
            .write()
            .insert(chain, ChainBackend { client, tracker });
    }

    /// Chains that can be watched.
    #[must_use]
    pub fn chains(&self) -> Vec<Chain> {
        let mut chains: Vec<_> = self.shared.backends.read().keys().cloned().collect();
        chains.sort();
        chains
    }

    /// Start watching `expectation`, or join the running watch with the same
    /// key. A key that already settled yields a finished handle carrying the
    /// final verdict.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownChain`] if the chain was never registered, or
    /// [`Error::ShuttingDown`] after [`Self::shutdown`].
    pub fn watch(&self, expectation: PaymentExpectation) -> Result<WatchHandle> {
        if *self.shared.shutdown_rx.borrow() {
            return Err(Error::ShuttingDown);
        }

        let backend = self
            .shared
            .backends
            .read()
            .get(expectation.chain())
            .cloned()
            .ok_or_else(|| Error::UnknownChain(expectation.chain().to_string()))?;

        let key = expectation.key();
        let mut active = self.shared.active.lock();

        if let Some(existing) = active.get(&key) {
            debug!("Joining existing watch {}", key);
            return Ok(WatchHandle {
                key,
                status: existing.status.clone(),
                cancel: Arc::clone(&existing.cancel),
                replay: None,
                done: false,
            });
        }

        if let Some(verdict) = self.shared.settled.lock().get(&key).cloned() {
            debug!("Watch {} already settled, replaying verdict", key);
            return Ok(WatchHandle::settled(key, verdict));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (status_tx, status_rx) = watch::channel(WatchStatus::Starting);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let heads = self
            .shared
            .feeds
            .subscribe(expectation.chain(), Arc::clone(&backend.client));

        active.insert(
            key.clone(),
            ActiveWatch {
                id,
                status: status_rx.clone(),
                cancel: Arc::clone(&cancel_tx),
            },
        );
        drop(active);

        info!(
            "Watching order {} on {}: {} to {} (min {})",
            expectation.order_id(),
            expectation.chain(),
            expectation.expected_amount(),
            expectation.expected_address(),
            expectation.min_acceptable()
        );

        let task = WatchTask {
            shared: Arc::clone(&self.shared),
            id,
            key: key.clone(),
            expectation,
            backend,
            heads,
            cancel: cancel_rx,
            shutdown: self.shared.shutdown_rx.clone(),
            status: status_tx,
            next_block: None,
            candidate: None,
        };
        tokio::spawn(task.run());

        Ok(WatchHandle {
            key,
            status: status_rx,
            cancel: cancel_tx,
            replay: None,
            done: false,
        })
    }

    /// Cancel the watch for `key`. Returns `false` if none is running.
    pub fn cancel(&self, key: &WatchKey) -> bool {
        self.shared
            .active
            .lock()
            .get(key)
            .is_some_and(|active| active.cancel.send(true).is_ok())
    }

    /// Whether a watch for `key` is running.
    #[must_use]
    pub fn is_watching(&self, key: &WatchKey) -> bool {
        self.shared.active.lock().contains_key(key)
    }

    /// Drop the settled record for `key` so it can be watched afresh.
    /// Returns `false` if the key never settled or was already evicted.
    pub fn forget(&self, key: &WatchKey) -> bool {
        self.shared.settled.lock().pop(key).is_some()
    }

    /// Final verdict recorded for `key`, if it settled.
    #[must_use]
    pub fn settled_verdict(&self, key: &WatchKey) -> Option<ConfirmationVerdict> {
        self.shared.settled.lock().peek(key).cloned()
    }

    /// Number of running watches.
    #[must_use]
    pub fn active_watches(&self) -> usize {
        self.shared.active.lock().len()
    }

    /// Stop every watch and head feed. Further `watch` calls fail.
    pub fn shutdown(&self) {
        if self.shared.shutdown_tx.send_replace(true) {
            return;
        }
        info!(
            "Payment watcher shutting down ({} active watches)",
            self.active_watches()
        );
    }
}

/// Handle to one watch's verdict stream.
///
/// Any number of handles may observe the same watch. Dropping a handle does
/// not stop the watch; call [`Self::cancel`] for that.
pub struct WatchHandle {
    key: WatchKey,
    status: watch::Receiver<WatchStatus>,
    cancel: Arc<watch::Sender<bool>>,
    replay: Option<ConfirmationVerdict>,
    done: bool,
}

impl WatchHandle {
    fn settled(key: WatchKey, verdict: ConfirmationVerdict) -> Self {
        let (_, status) = watch::channel(WatchStatus::Update(verdict.clone()));
        let (cancel, _) = watch::channel(true);
        Self {
            key,
            status,
            cancel: Arc::new(cancel),
            replay: Some(verdict),
            done: false,
        }
    }

    /// Key of the watch.
    #[must_use]
    pub fn key(&self) -> &WatchKey {
        &self.key
    }

    /// Current status without waiting.
    #[must_use]
    pub fn status(&self) -> WatchStatus {
        self.status.borrow().clone()
    }

    /// Next unseen verdict. `None` once the watch was cancelled, or after
    /// the terminal verdict has been returned.
    ///
    /// Pending updates that arrive faster than they are read collapse into
    /// the latest one.
    pub async fn next(&mut self) -> Option<ConfirmationVerdict> {
        if let Some(verdict) = self.replay.take() {
            self.done = true;
            return Some(verdict);
        }
        while !self.done {
            // Err: the task ended and its final status was already seen.
            if self.status.changed().await.is_err() {
                self.done = true;
                break;
            }
            let status = self.status.borrow_and_update().clone();
            match status {
                WatchStatus::Starting => {}
                WatchStatus::Cancelled => self.done = true,
                WatchStatus::Update(verdict) => {
                    self.done = verdict.is_terminal();
                    return Some(verdict);
                }
            }
        }
        None
    }

    /// Wait for the terminal verdict, skipping pending updates. `None` if
    /// cancelled.
    pub async fn wait(mut self) -> Option<ConfirmationVerdict> {
        while let Some(verdict) = self.next().await {
            if verdict.is_terminal() {
                return Some(verdict);
            }
        }
        None
    }

    /// Request cancellation. The watch stops without a verdict.
    pub fn cancel(&self) {
        // Fails only if the watch already finished.
        let _ = self.cancel.send(true);
    }

    /// Whether the watch ended by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.status.borrow(), WatchStatus::Cancelled)
    }

    /// Verdicts as a stream, ending after the terminal one.
    pub fn into_stream(self) -> impl Stream<Item = ConfirmationVerdict> {
        stream::unfold(self, |mut handle| async move {
            let verdict = handle.next().await?;
            Some((verdict, handle))
        })
    }
}

enum Outcome {
    Verdict(ConfirmationVerdict),
    Stopped,
}

struct WatchTask {
    shared: Arc<Shared>,
    id: u64,
    key: WatchKey,
    expectation: PaymentExpectation,
    backend: ChainBackend,
    heads: HeadSubscription,
    cancel: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
    status: watch::Sender<WatchStatus>,
    next_block: Option<u64>,
    candidate: Option<CandidateTransaction>,
}

impl WatchTask {
    async fn run(mut self) {
        let outcome = self.drive().await;

        // Deregister before publishing, so a caller reacting to the final
        // status can re-arm the same key. Settling happens under the same
        // lock so a concurrent `watch` sees either the live entry or the
        // record.
        {
            let mut active = self.shared.active.lock();
            if active.get(&self.key).is_some_and(|w| w.id == self.id) {
                active.remove(&self.key);
                if let Outcome::Verdict(verdict) = &outcome {
                    if verdict.settles() {
                        self.shared
                            .settled
                            .lock()
                            .put(self.key.clone(), verdict.clone());
                    }
                }
            }
        }

        match outcome {
            Outcome::Verdict(verdict) => self.finish(verdict),
            Outcome::Stopped => {
                info!("Watch {} cancelled", self.key);
                self.status.send_replace(WatchStatus::Cancelled);
            }
        }
    }

    async fn drive(&mut self) -> Outcome {
        let timeout = self.shared.config.expectation_timeout_secs;
        let tick = Duration::from_millis(self.shared.config.poll_interval_ms);
        let mut last_head = None;
        let mut retry = false;

        loop {
            let now = self.shared.clock.now_secs();
            if self.expectation.is_expired(now, timeout) {
                info!(
                    "Order {} expired after {}s",
                    self.expectation.order_id(),
                    timeout
                );
                return Outcome::Verdict(ConfirmationVerdict::Rejected {
                    reason: ConfirmationFailure::Expired,
                });
            }

            if let Some(head) = self.heads.latest().filter(|h| retry || last_head != Some(*h)) {
                last_head = Some(head);
                match self.poll(head).await {
                    Ok(verdict) if verdict.is_terminal() => return Outcome::Verdict(verdict),
                    Ok(verdict) => {
                        retry = false;
                        self.publish(verdict);
                    }
                    Err(e) => {
                        retry = true;
                        warn!("Watch {} poll failed, will retry: {}", self.key, e);
                    }
                }
            }

            let wait = tick.min(Duration::from_secs(
                self.expectation.remaining_secs(now, timeout).max(1),
            ));
            tokio::select! {
                biased;
                _ = self.cancel.changed() => return Outcome::Stopped,
                _ = self.shutdown.changed() => return Outcome::Stopped,
                alive = self.heads.changed() => {
                    if !alive {
                        return Outcome::Stopped;
                    }
                }
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn poll(&mut self, head: u64) -> Result<ConfirmationVerdict> {
        if self.candidate.is_none() {
            self.scan(head).await?;
        }

        match &self.candidate {
            None => Ok(ConfirmationVerdict::Pending { confirmations: 0 }),
            Some(candidate) => {
                self.backend
                    .tracker
                    .evaluate(&self.expectation, std::slice::from_ref(candidate), head)
                    .await
            }
        }
    }

    /// Scan blocks up to `head` in order, stopping at the first qualifying
    /// transaction.
    async fn scan(&mut self, head: u64) -> Result<()> {
        let lookback = self.shared.config.lookback_blocks;
        let mut cursor = *self
            .next_block
            .get_or_insert_with(|| head.saturating_sub(lookback));

        while cursor <= head {
            let Some(block) = self.backend.client.get_block(cursor).await? else {
                break;
            };
            cursor += 1;
            self.next_block = Some(cursor);

            for tx in &block.transactions {
                let Some(candidate) = CandidateTransaction::from_block(tx, &block) else {
                    continue;
                };
                match self.backend.tracker.qualify(&self.expectation, &candidate) {
                    CandidateMatch::Qualified => {
                        info!(
                            "Order {}: candidate {} in block {}",
                            self.expectation.order_id(),
                            candidate.hash,
                            candidate.block_number
                        );
                        self.candidate = Some(candidate);
                        return Ok(());
                    }
                    CandidateMatch::Underpaid => warn!(
                        "Order {}: {} pays {}, below minimum {} ({})",
                        self.expectation.order_id(),
                        candidate.hash,
                        candidate.amount,
                        self.expectation.min_acceptable(),
                        ConfirmationFailure::AmountMismatch
                    ),
                    CandidateMatch::WrongAddress => {}
                }
            }
        }
        Ok(())
    }

    fn publish(&self, verdict: ConfirmationVerdict) {
        let update = WatchStatus::Update(verdict);
        self.status.send_if_modified(|current| {
            if *current == update {
                false
            } else {
                *current = update;
                true
            }
        });
    }

    fn finish(&self, verdict: ConfirmationVerdict) {
        let chain = self.expectation.chain().clone();
        let order_id = self.expectation.order_id().to_string();

        let event = match &verdict {
            ConfirmationVerdict::Confirmed {
                tx_hash,
                block_number,
                amount,
            } => {
                let fingerprint = Fingerprint::for_payment(chain.as_str(), &order_id, tx_hash);
                if self
                    .shared
                    .processed
                    .insert(fingerprint, self.shared.clock.now_secs())
                {
                    Some(PaymentEvent::Confirmed {
                        chain,
                        order_id,
                        tx_hash: tx_hash.clone(),
                        amount: *amount,
                        block_number: *block_number,
                    })
                } else {
                    info!(
                        "Payment {} for order {} already recorded",
                        tx_hash, order_id
                    );
                    None
                }
            }
            ConfirmationVerdict::Rejected { reason } => {
                info!("Order {} rejected: {}", order_id, reason);
                Some(PaymentEvent::Rejected {
                    chain,
                    order_id,
                    reason: *reason,
                })
            }
            ConfirmationVerdict::Pending { .. } => None,
        };

        if let Some(event) = event {
            // No subscribers is not an error.
            let _ = self.shared.events.send(event);
        }
        self.status.send_replace(WatchStatus::Update(verdict));
    }
}
