//! Test harness wiring a service to in-memory chain, explorer and clock.

#![allow(clippy::expect_used)]

use payguard::chain::memory::{InMemoryChain, InMemoryExplorer};
use payguard::{
    Amount, AuthenticatedRequest, Chain, ExplorerTxInfo, GuardConfig, HmacSecret, ManualClock,
    PaymentEvent, PaymentEventsChannel, PaymentExpectation, PaymentWatcher, RequestAuthenticator,
    RequestSigner, RunningService, ServiceBuilder, Tolerance,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

/// Fixed start time for the manual clock.
pub const NOW: u64 = 1_700_000_000;

/// Shared secret used by every harness (`secret-key`).
pub const SECRET_HEX: &str = "7365637265742d6b6579";

/// Shop address payments are sent to.
pub const SHOP: &str = "0x5e1f000000000000000000000000000000005e1f";

/// How long any single wait may take before the test fails.
const WAIT: Duration = Duration::from_secs(5);

/// A service over in-memory collaborators.
pub struct TestHarness {
    /// Chain double for `ETH`.
    pub chain: InMemoryChain,
    /// Explorer double for `ETH`.
    pub explorer: InMemoryExplorer,
    /// Clock shared by the authenticator and the watcher.
    pub clock: Arc<ManualClock>,
    service: RunningService,
    events: PaymentEventsChannel,
}

impl TestHarness {
    /// Harness with the default test configuration.
    pub async fn setup() -> Self {
        Self::setup_with_config(Self::config()).await
    }

    /// Default test configuration: fast polling, ten-minute expiry.
    pub fn config() -> GuardConfig {
        let mut config = GuardConfig::default();
        config.auth.hmac_secret = HmacSecret::from_hex(SECRET_HEX).expect("valid hex");
        config.watcher.poll_interval_ms = 10;
        config.watcher.expectation_timeout_secs = 600;
        config
    }

    /// Harness with a custom configuration.
    pub async fn setup_with_config(config: GuardConfig) -> Self {
        let chain = InMemoryChain::new();
        let explorer = InMemoryExplorer::new();
        let clock = Arc::new(ManualClock::new(NOW));

        let mut service = ServiceBuilder::new(config)
            .with_clock(clock.clone())
            .with_chain("ETH", Arc::new(chain.clone()), Arc::new(explorer.clone()))
            .build()
            .await
            .expect("service builds");
        let events = service.events().expect("first call");

        Self {
            chain,
            explorer,
            clock,
            service,
            events,
        }
    }

    /// The service under test.
    pub fn service(&self) -> &RunningService {
        &self.service
    }

    /// The service's watcher.
    pub fn watcher(&self) -> &PaymentWatcher {
        self.service.watcher()
    }

    /// The service's authenticator.
    pub fn authenticator(&self) -> Arc<RequestAuthenticator> {
        self.service.authenticator()
    }

    /// ETH expectation for `amount` to the shop with 5% tolerance.
    pub fn expectation(&self, order_id: &str, amount: u128) -> PaymentExpectation {
        PaymentExpectation::new(
            Chain::new("ETH"),
            order_id,
            SHOP,
            Amount::new(amount),
            Tolerance::from_fraction(0.05).expect("valid"),
            NOW,
        )
        .expect("valid expectation")
    }

    /// Mine a payment to the shop that the explorer agrees with. Returns
    /// its block number.
    pub fn pay(&self, hash: &str, value: u128) -> u64 {
        let number = self
            .chain
            .mine(vec![InMemoryChain::transfer(hash, SHOP, value)]);
        self.explorer.set(hash, ExplorerTxInfo::success(number));
        number
    }

    /// Next ledger event.
    pub async fn next_event(&mut self) -> PaymentEvent {
        within(self.events.recv()).await.expect("event channel open")
    }

    /// Assert no ledger event is pending after giving the watcher a few
    /// poll intervals to misbehave.
    pub async fn assert_no_event(&mut self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(self.events.try_recv(), Err(TryRecvError::Empty)));
    }

    /// A request signed at `timestamp` with the harness secret.
    pub fn signed(
        &self,
        client: &str,
        method: &str,
        path: &str,
        body: &[u8],
        timestamp: i64,
    ) -> AuthenticatedRequest {
        let signer = RequestSigner::new(HmacSecret::from_hex(SECRET_HEX).expect("valid hex"));
        let headers = signer.headers(timestamp, method, path, body);
        AuthenticatedRequest::from_headers(
            method,
            path,
            client,
            headers.iter().map(|(name, value)| (*name, value.as_str())),
            body.to_vec(),
        )
    }

    /// Stop the service.
    pub fn teardown(self) {
        self.service.watcher().shutdown();
        self.service.shutdown();
    }
}

/// Await `fut`, failing the test if it takes longer than a few seconds.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}

/// The harness start time as a signed request timestamp.
#[allow(clippy::cast_possible_wrap)]
pub const fn now_ts() -> i64 {
    NOW as i64
}
