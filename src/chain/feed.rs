//! Per-chain head subscriptions.
//!
//! One poller per chain publishes the head height; every watch on that
//! chain holds its own [`HeadSubscription`]. Dropping a subscription tears
//! down only that watch's interest, and a feed with no subscribers stops on
//! its next tick.
//!
//! A feed is tied to the client it polls. Subscribing with a different
//! client (a re-registered backend) starts a fresh poller; the displaced one
//! keeps serving its existing subscribers until they drop.

use crate::chain::ChainClient;
use crate::payment::Chain;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct Feed {
    id: u64,
    client: Arc<dyn ChainClient>,
    rx: watch::Receiver<Option<u64>>,
}

type FeedMap = HashMap<Chain, Feed>;

fn same_client(a: &Arc<dyn ChainClient>, b: &Arc<dyn ChainClient>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Registry of running head pollers.
#[derive(Clone)]
pub struct HeadFeeds {
    feeds: Arc<Mutex<FeedMap>>,
    next_id: Arc<AtomicU64>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

/// A single watch's view of a chain head.
pub struct HeadSubscription {
    chain: Chain,
    rx: watch::Receiver<Option<u64>>,
}

impl HeadSubscription {
    /// Wait for the next head change. Returns `false` once the feed has
    /// stopped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Latest published head, marking it seen.
    pub fn latest(&mut self) -> Option<u64> {
        *self.rx.borrow_and_update()
    }

    /// Chain this subscription follows.
    #[must_use]
    pub fn chain(&self) -> &Chain {
        &self.chain
    }
}

impl HeadFeeds {
    /// Create an empty registry. Pollers stop when `shutdown` flips to
    /// `true`.
    #[must_use]
    pub fn new(poll_interval: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            feeds: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            poll_interval,
            shutdown,
        }
    }

    /// Subscribe to `chain` through `client`, starting a poller unless one
    /// is already running for that same client.
    #[must_use]
    pub fn subscribe(&self, chain: &Chain, client: Arc<dyn ChainClient>) -> HeadSubscription {
        let mut feeds = self.feeds.lock();

        if let Some(feed) = feeds.get(chain) {
            // A closed channel means the poller exited; replace it.
            if same_client(&feed.client, &client) && feed.rx.has_changed().is_ok() {
                return HeadSubscription {
                    chain: chain.clone(),
                    rx: feed.rx.clone(),
                };
            }
            debug!("Replacing head feed for {}", chain);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        feeds.insert(
            chain.clone(),
            Feed {
                id,
                client: Arc::clone(&client),
                rx: rx.clone(),
            },
        );
        tokio::spawn(poll_head(
            chain.clone(),
            id,
            client,
            tx,
            Arc::clone(&self.feeds),
            self.poll_interval,
            self.shutdown.clone(),
        ));
        info!("Started head feed for {}", chain);

        HeadSubscription {
            chain: chain.clone(),
            rx,
        }
    }

    /// Number of feeds currently registered.
    #[must_use]
    pub fn active_feeds(&self) -> usize {
        self.feeds.lock().len()
    }
}

async fn poll_head(
    chain: Chain,
    id: u64,
    client: Arc<dyn ChainClient>,
    tx: watch::Sender<Option<u64>>,
    feeds: Arc<Mutex<FeedMap>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        // While registered, the map holds one template receiver; anything
        // beyond it is a watch.
        {
            let mut map = feeds.lock();
            let registered = map.get(&chain).is_some_and(|feed| feed.id == id);
            if tx.receiver_count() <= usize::from(registered) {
                if registered {
                    map.remove(&chain);
                }
                debug!("Head feed for {} has no subscribers", chain);
                break;
            }
        }

        match client.head_height().await {
            Ok(height) => {
                tx.send_if_modified(|current| {
                    if *current == Some(height) {
                        false
                    } else {
                        debug!("{} head -> {}", chain, height);
                        *current = Some(height);
                        true
                    }
                });
            }
            Err(e) => warn!("Head poll failed for {}: {}", chain, e),
        }
    }

    info!("Stopped head feed for {}", chain);
}
