//! Request authentication through the full service.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::harness::{now_ts, within};
use super::{TestHarness, NOW};
use payguard::config::RateLimitScope;
use payguard::{AuthError, AuthenticatedRequest, ServiceBuilder};
use std::time::Duration;

const PATH: &str = "/wallet/generate";
const BODY: &[u8] = br#"{"chain":"ETH","order_id":"order-1"}"#;

#[tokio::test]
async fn test_signed_request_accepted_once() {
    let harness = TestHarness::setup().await;
    let auth = harness.authenticator();
    let request = harness.signed("10.0.0.1", "POST", PATH, BODY, now_ts());

    assert_eq!(auth.authenticate(&request), Ok(()));

    let replay = auth.authenticate(&request).expect_err("replay");
    assert_eq!(replay, AuthError::ReplayDetected);
    assert_eq!(replay.rejection().status, 401);
    assert_eq!(replay.rejection().to_json(), r#"{"error":"unauthorized"}"#);
    harness.teardown();
}

#[tokio::test]
async fn test_replay_window_boundary() {
    let harness = TestHarness::setup().await;
    let auth = harness.authenticator();

    let edge = harness.signed("c", "GET", "/orders", b"", now_ts() - 300);
    assert_eq!(auth.authenticate(&edge), Ok(()));

    let stale = harness.signed("c", "GET", "/orders", b"", now_ts() - 301);
    assert_eq!(auth.authenticate(&stale), Err(AuthError::WindowExceeded));

    let future = harness.signed("c", "GET", "/orders", b"", now_ts() + 301);
    assert_eq!(auth.authenticate(&future), Err(AuthError::WindowExceeded));
    harness.teardown();
}

#[tokio::test]
async fn test_replay_rejected_until_window_passes() {
    let harness = TestHarness::setup().await;
    let auth = harness.authenticator();
    let request = harness.signed("c", "POST", PATH, BODY, now_ts());
    assert_eq!(auth.authenticate(&request), Ok(()));

    // Still within the window: still a replay, however late.
    harness.clock.advance(299);
    assert_eq!(
        auth.authenticate(&request),
        Err(AuthError::ReplayDetected)
    );

    // Past the window the timestamp check rejects it instead.
    harness.clock.advance(2);
    assert_eq!(auth.authenticate(&request), Err(AuthError::WindowExceeded));
    harness.teardown();
}

#[tokio::test]
async fn test_tampering_is_rejected_generically() {
    let harness = TestHarness::setup().await;
    let auth = harness.authenticator();
    let signed = harness.signed("c", "POST", PATH, BODY, now_ts());

    let mut swapped_body = signed.clone();
    swapped_body.body = br#"{"chain":"ETH","order_id":"order-2"}"#.to_vec().into();
    let mut swapped_path = signed.clone();
    swapped_path.path = "/wallet/withdraw".to_string();
    let mut swapped_method = signed.clone();
    swapped_method.method = "PUT".to_string();
    let mut flipped = signed.clone();
    let mut sig = flipped.signature.clone().expect("signed").into_bytes();
    sig[0] = if sig[0] == b'0' { b'1' } else { b'0' };
    flipped.signature = Some(String::from_utf8(sig).expect("ascii"));

    for request in [swapped_body, swapped_path, swapped_method, flipped] {
        let err = auth.authenticate(&request).expect_err("tampered");
        assert_eq!(err, AuthError::InvalidSignature);
        assert_eq!(err.rejection(), AuthError::WindowExceeded.rejection());
    }

    // The genuine request was never recorded, so it still passes.
    assert_eq!(auth.authenticate(&signed), Ok(()));
    harness.teardown();
}

#[tokio::test]
async fn test_missing_credentials() {
    let harness = TestHarness::setup().await;
    let auth = harness.authenticator();

    let bare = AuthenticatedRequest::from_headers(
        "POST",
        PATH,
        "c",
        std::iter::empty::<(&str, &str)>(),
        BODY.to_vec(),
    );
    assert_eq!(auth.authenticate(&bare), Err(AuthError::MissingCredentials));

    let garbled = AuthenticatedRequest::from_headers(
        "POST",
        PATH,
        "c",
        [
            ("x-request-timestamp", "yesterday"),
            ("x-request-signature", "00"),
        ],
        BODY.to_vec(),
    );
    assert_eq!(
        auth.authenticate(&garbled),
        Err(AuthError::MissingCredentials)
    );
    harness.teardown();
}

#[tokio::test]
async fn test_rate_limit_resets_at_window_boundary() {
    let mut config = TestHarness::config();
    config.auth.rate_limit_per_window = 3;
    config.auth.rate_limit_window_secs = 60;
    config.auth.rate_limit_scope = RateLimitScope::Client;
    let harness = TestHarness::setup_with_config(config).await;
    let auth = harness.authenticator();

    for i in 0..3 {
        let request = harness.signed("abuser", "GET", &format!("/orders/{i}"), b"", now_ts());
        assert_eq!(auth.authenticate(&request), Ok(()));
    }

    let fourth = harness.signed("abuser", "GET", "/orders/3", b"", now_ts());
    let err = auth.authenticate(&fourth).expect_err("limited");
    assert_eq!(err, AuthError::RateLimited);
    assert_eq!(err.rejection().status, 429);

    // Other clients have their own buckets.
    let other = harness.signed("neighbour", "GET", "/orders/3", b"", now_ts());
    assert_eq!(auth.authenticate(&other), Ok(()));

    harness.clock.advance(60);
    let fresh = harness.signed("abuser", "GET", "/orders/4", b"", now_ts() + 60);
    assert_eq!(auth.authenticate(&fresh), Ok(()));
    harness.teardown();
}

#[tokio::test]
async fn test_service_runs_until_shutdown() {
    let clock = std::sync::Arc::new(payguard::ManualClock::new(NOW));
    let mut service = ServiceBuilder::new(TestHarness::config())
        .with_clock(clock)
        .build()
        .await
        .expect("builds");
    let stop = service.shutdown_handle();
    let watcher = service.watcher().clone();

    let running = tokio::spawn(async move { service.run().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    stop.send(true).expect("service listening");

    within(running)
        .await
        .expect("task joins")
        .expect("clean shutdown");
    assert!(matches!(
        watcher.watch(
            payguard::PaymentExpectation::new(
                payguard::Chain::new("ETH"),
                "o",
                "0x1",
                payguard::Amount::new(1),
                payguard::Tolerance::default(),
                NOW,
            )
            .expect("valid")
        ),
        Err(payguard::Error::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_unconfigured_chain_endpoints_fail_build() {
    let mut config = TestHarness::config();
    config
        .chains
        .insert("eth".to_string(), payguard::ChainConfig::default());

    let result = ServiceBuilder::new(config).build().await;
    assert!(matches!(result, Err(payguard::Error::Config(_))));
}
