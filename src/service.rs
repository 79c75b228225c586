//! Service wiring: stores, authenticator, watcher and chain clients built
//! from a [`GuardConfig`], plus the background tasks that keep them tidy.

use crate::auth::RequestAuthenticator;
use crate::chain::{BlockscoutExplorer, ChainClient, ExplorerClient, JsonRpcChainClient};
use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::error::{Error, Result};
use crate::event::{create_event_channel, PaymentEventsChannel, PaymentEventsSender};
use crate::idempotency::{spawn_sweeper, IdempotencyStore, MemoryIdempotencyStore};
use crate::payment::{Chain, PaymentWatcher};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

type Backend = (Arc<dyn ChainClient>, Arc<dyn ExplorerClient>);

/// Builder for a payguard service.
pub struct ServiceBuilder {
    config: GuardConfig,
    clock: Arc<dyn Clock>,
    backends: HashMap<Chain, Backend>,
}

impl ServiceBuilder {
    /// Create a new builder with the given configuration.
    #[must_use]
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            backends: HashMap::new(),
        }
    }

    /// Use `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use the given clients for `chain` instead of building HTTP clients
    /// from its config entry. The chain need not appear in the config.
    #[must_use]
    pub fn with_chain(
        mut self,
        chain: &str,
        client: Arc<dyn ChainClient>,
        explorer: Arc<dyn ExplorerClient>,
    ) -> Self {
        self.backends.insert(Chain::new(chain), (client, explorer));
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or a configured
    /// chain has neither injected clients nor both endpoint URLs.
    pub async fn build(mut self) -> Result<RunningService> {
        self.config.validate()?;
        if self.config.auth.hmac_secret.is_empty() {
            warn!("No HMAC secret configured; every signed request will be rejected");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = create_event_channel();

        let replay_store: Arc<dyn IdempotencyStore> = Arc::new(MemoryIdempotencyStore::new());
        let processed_store: Arc<dyn IdempotencyStore> = Arc::new(MemoryIdempotencyStore::new());

        let authenticator = Arc::new(RequestAuthenticator::new(
            &self.config.auth,
            Arc::clone(&replay_store),
            Arc::clone(&self.clock),
        ));

        let watcher = PaymentWatcher::new(
            self.config.watcher.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&processed_store),
            events_tx.clone(),
        );

        for (name, chain_config) in &self.config.chains {
            let chain = Chain::new(name);
            if self.backends.contains_key(&chain) {
                continue;
            }
            let (Some(rpc_url), Some(explorer_url)) =
                (&chain_config.rpc_url, &chain_config.explorer_url)
            else {
                return Err(Error::Config(format!(
                    "chain {chain} needs both rpc_url and explorer_url"
                )));
            };
            let timeout = Duration::from_secs(chain_config.request_timeout_secs);
            let client: Arc<dyn ChainClient> =
                Arc::new(JsonRpcChainClient::new(rpc_url.clone(), timeout)?);
            let explorer: Arc<dyn ExplorerClient> = Arc::new(BlockscoutExplorer::new(
                explorer_url.clone(),
                chain_config.explorer_api_key.clone(),
                timeout,
            )?);
            self.backends.insert(chain, (client, explorer));
        }

        for (chain, (client, explorer)) in self.backends {
            let policy = self.config.chain_policy(chain.as_str());
            watcher.register_chain(chain, policy, client, explorer);
        }

        info!(
            "Built payguard service ({} chains)",
            watcher.chains().len()
        );

        Ok(RunningService {
            config: self.config,
            clock: self.clock,
            replay_store,
            processed_store,
            authenticator,
            watcher,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            events_tx,
            events_rx: Some(events_rx),
        })
    }
}

/// A running payguard service.
pub struct RunningService {
    config: GuardConfig,
    clock: Arc<dyn Clock>,
    replay_store: Arc<dyn IdempotencyStore>,
    processed_store: Arc<dyn IdempotencyStore>,
    authenticator: Arc<RequestAuthenticator>,
    watcher: PaymentWatcher,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: PaymentEventsSender,
    events_rx: Option<PaymentEventsChannel>,
}

impl RunningService {
    /// Configuration the service was built with.
    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Request authenticator; share it with the HTTP layer.
    #[must_use]
    pub fn authenticator(&self) -> Arc<RequestAuthenticator> {
        Arc::clone(&self.authenticator)
    }

    /// Payment watcher.
    #[must_use]
    pub fn watcher(&self) -> &PaymentWatcher {
        &self.watcher
    }

    /// Get a receiver for payment events.
    ///
    /// Note: Can only be called once. Subsequent calls return None.
    pub fn events(&mut self) -> Option<PaymentEventsChannel> {
        self.events_rx.take()
    }

    /// Subscribe to payment events.
    #[must_use]
    pub fn subscribe_events(&self) -> PaymentEventsChannel {
        self.events_tx.subscribe()
    }

    /// Run until shutdown is requested or Ctrl-C is received.
    ///
    /// Sweeps both idempotency stores in the background; on exit every
    /// watch is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the service encounters a fatal error.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting payguard");

        let interval = Duration::from_secs(self.config.auth.sweep_interval_secs.max(1));
        let sweepers = [
            spawn_sweeper(
                "replay",
                Arc::clone(&self.replay_store),
                Arc::clone(&self.clock),
                self.config.auth.replay_window_secs,
                interval,
                self.shutdown_rx.clone(),
            ),
            spawn_sweeper(
                "processed",
                Arc::clone(&self.processed_store),
                Arc::clone(&self.clock),
                self.config.watcher.processed_retention_secs,
                interval,
                self.shutdown_rx.clone(),
            ),
        ];

        info!("Service running, waiting for shutdown signal");
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, initiating shutdown");
                    self.shutdown();
                    break;
                }
            }
        }

        self.watcher.shutdown();
        for sweeper in sweepers {
            if let Err(e) = sweeper.await {
                warn!("Sweeper task failed: {}", e);
            }
        }

        info!("Service shutdown complete");
        Ok(())
    }

    /// Request the service to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// A handle that can request shutdown while [`Self::run`] is borrowed
    /// elsewhere. Send `true` on it to stop.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.shutdown_tx)
    }
}
