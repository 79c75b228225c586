//! Payment confirmation through the full service.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::harness::{within, SHOP};
use super::{TestHarness, NOW};
use payguard::chain::memory::InMemoryChain;
use payguard::{
    Amount, Chain, ConfirmationFailure, ConfirmationVerdict, Error, ExplorerTxInfo, PaymentEvent,
    PaymentExpectation, Tolerance, WatchHandle,
};
use std::time::Duration;

/// Read verdicts until `confirmations` deep, failing on any terminal one.
async fn wait_pending(handle: &mut WatchHandle, confirmations: u64) {
    within(async {
        loop {
            match handle.next().await {
                Some(ConfirmationVerdict::Pending { confirmations: c }) if c == confirmations => {
                    return;
                }
                Some(ConfirmationVerdict::Pending { .. }) => {}
                other => panic!("expected pending, got {other:?}"),
            }
        }
    })
    .await;
}

/// Read verdicts until the terminal one.
async fn wait_terminal(handle: &mut WatchHandle) -> ConfirmationVerdict {
    within(async {
        loop {
            match handle.next().await {
                Some(verdict) if verdict.is_terminal() => return verdict,
                Some(_) => {}
                None => panic!("watch ended without a verdict"),
            }
        }
    })
    .await
}

#[tokio::test]
async fn test_confirms_at_required_depth() {
    let mut harness = TestHarness::setup().await;
    let mut handle = harness
        .watcher()
        .watch(harness.expectation("order-1", 100))
        .expect("watch");

    // 96 is within 5% of 100.
    let block = harness.pay("0xaa01", 96);
    harness.chain.mine_empty(11);
    wait_pending(&mut handle, 11).await;

    harness.chain.mine_empty(1);
    let verdict = wait_terminal(&mut handle).await;
    assert_eq!(
        verdict,
        ConfirmationVerdict::Confirmed {
            tx_hash: "0xaa01".to_string(),
            block_number: block,
            amount: Amount::new(96),
        }
    );

    assert_eq!(
        harness.next_event().await,
        PaymentEvent::Confirmed {
            chain: Chain::new("ETH"),
            order_id: "order-1".to_string(),
            tx_hash: "0xaa01".to_string(),
            amount: Amount::new(96),
            block_number: block,
        }
    );
    assert_eq!(handle.next().await, None);
    harness.teardown();
}

#[tokio::test]
async fn test_underpayment_does_not_stop_scanning() {
    let mut harness = TestHarness::setup().await;
    let handle = harness
        .watcher()
        .watch(harness.expectation("order-2", 100))
        .expect("watch");

    harness.pay("0xbb01", 94);
    harness.pay("0xbb02", 95);
    harness.chain.mine_empty(12);

    let verdict = within(handle.wait()).await.expect("verdict");
    assert!(matches!(
        verdict,
        ConfirmationVerdict::Confirmed { ref tx_hash, .. } if tx_hash == "0xbb02"
    ));
    assert!(matches!(
        harness.next_event().await,
        PaymentEvent::Confirmed { .. }
    ));
    harness.teardown();
}

#[tokio::test]
async fn test_reorg_rejects_then_rearm_confirms_new_payment() {
    let mut harness = TestHarness::setup().await;
    let expectation = harness.expectation("order-3", 100);
    let mut handle = harness.watcher().watch(expectation.clone()).expect("watch");

    let block = harness.pay("0xcc01", 100);
    harness.chain.mine_empty(11);
    wait_pending(&mut handle, 11).await;

    // The block is rewritten without the payment before it reaches depth.
    harness.chain.replace_block(block, Vec::new());
    harness.chain.mine_empty(1);

    let verdict = wait_terminal(&mut handle).await;
    assert_eq!(
        verdict.rejection(),
        Some(ConfirmationFailure::ReorgInvalidated)
    );
    assert_eq!(
        harness.next_event().await,
        PaymentEvent::Rejected {
            chain: Chain::new("ETH"),
            order_id: "order-3".to_string(),
            reason: ConfirmationFailure::ReorgInvalidated,
        }
    );

    // Re-arm the same expectation; the customer pays again.
    let mut handle = harness.watcher().watch(expectation).expect("re-arm");
    let block = harness.pay("0xcc02", 100);
    harness.chain.mine_empty(12);

    let verdict = wait_terminal(&mut handle).await;
    assert_eq!(
        verdict,
        ConfirmationVerdict::Confirmed {
            tx_hash: "0xcc02".to_string(),
            block_number: block,
            amount: Amount::new(100),
        }
    );
    harness.teardown();
}

#[tokio::test]
async fn test_explorer_block_mismatch_rejects() {
    let mut harness = TestHarness::setup().await;
    let handle = harness
        .watcher()
        .watch(harness.expectation("order-4", 100))
        .expect("watch");

    let block = harness.pay("0xdd01", 100);
    harness
        .explorer
        .set("0xdd01", ExplorerTxInfo::success(block + 1));
    harness.chain.mine_empty(12);

    let verdict = within(handle.wait()).await.expect("verdict");
    assert_eq!(
        verdict.rejection(),
        Some(ConfirmationFailure::CorroborationFailed)
    );
    assert!(matches!(
        harness.next_event().await,
        PaymentEvent::Rejected {
            reason: ConfirmationFailure::CorroborationFailed,
            ..
        }
    ));
    harness.teardown();
}

#[tokio::test]
async fn test_explorer_outage_is_retried() {
    let harness = TestHarness::setup().await;
    let handle = harness
        .watcher()
        .watch(harness.expectation("order-5", 100))
        .expect("watch");

    harness.explorer.set_unavailable(true);
    harness.pay("0xee01", 100);
    harness.chain.mine_empty(12);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.status().is_final());

    harness.explorer.set_unavailable(false);
    let verdict = within(handle.wait()).await.expect("verdict");
    assert!(verdict.is_confirmed());
    harness.teardown();
}

#[tokio::test]
async fn test_expiry_is_terminal_and_reported() {
    let mut harness = TestHarness::setup().await;
    let handle = harness
        .watcher()
        .watch(harness.expectation("order-6", 100))
        .expect("watch");

    harness.clock.advance(600);

    let verdict = within(handle.wait()).await.expect("verdict");
    assert_eq!(verdict.rejection(), Some(ConfirmationFailure::Expired));
    assert_eq!(
        harness.next_event().await,
        PaymentEvent::Rejected {
            chain: Chain::new("ETH"),
            order_id: "order-6".to_string(),
            reason: ConfirmationFailure::Expired,
        }
    );
    harness.teardown();
}

#[tokio::test]
async fn test_cancel_emits_no_ledger_event() {
    let mut harness = TestHarness::setup().await;
    let mut handle = harness
        .watcher()
        .watch(harness.expectation("order-7", 100))
        .expect("watch");
    harness.pay("0xff01", 100);

    handle.cancel();
    assert_eq!(within(handle.next()).await, None);
    assert!(handle.is_cancelled());
    assert_eq!(harness.watcher().active_watches(), 0);

    harness.chain.mine_empty(12);
    harness.assert_no_event().await;
    harness.teardown();
}

#[tokio::test]
async fn test_duplicate_watch_shares_stream_and_event() {
    let mut harness = TestHarness::setup().await;
    let first = harness
        .watcher()
        .watch(harness.expectation("order-8", 100))
        .expect("watch");
    let second = harness
        .watcher()
        .watch(harness.expectation("order-8", 100))
        .expect("watch");
    assert_eq!(first.key(), second.key());
    assert_eq!(harness.watcher().active_watches(), 1);

    harness.pay("0x1101", 100);
    harness.chain.mine_empty(12);

    let a = within(first.wait()).await.expect("verdict");
    let b = within(second.wait()).await.expect("verdict");
    assert_eq!(a, b);
    assert!(a.is_confirmed());

    assert!(matches!(
        harness.next_event().await,
        PaymentEvent::Confirmed { .. }
    ));
    harness.assert_no_event().await;
    harness.teardown();
}

#[tokio::test]
async fn test_rewatch_after_confirmation_does_not_duplicate_event() {
    let mut harness = TestHarness::setup().await;
    let expectation = harness.expectation("order-9", 100);

    harness.pay("0x2201", 100);
    harness.chain.mine_empty(12);

    let verdict = within(harness.watcher().watch(expectation.clone()).expect("watch").wait())
        .await
        .expect("verdict");
    assert!(verdict.is_confirmed());
    assert!(matches!(
        harness.next_event().await,
        PaymentEvent::Confirmed { .. }
    ));

    // Same order watched again finds the same payment.
    let again = within(harness.watcher().watch(expectation).expect("watch").wait())
        .await
        .expect("verdict");
    assert_eq!(again, verdict);
    harness.assert_no_event().await;
    harness.teardown();
}

#[tokio::test]
async fn test_paid_order_is_never_reported_expired() {
    let mut harness = TestHarness::setup().await;
    let expectation = harness.expectation("order-p", 100);

    harness.pay("0x2301", 100);
    harness.chain.mine_empty(12);
    let verdict = within(harness.watcher().watch(expectation.clone()).expect("watch").wait())
        .await
        .expect("verdict");
    assert!(verdict.is_confirmed());
    assert!(matches!(
        harness.next_event().await,
        PaymentEvent::Confirmed { .. }
    ));

    // The payment scrolls out of the lookback and the expectation ages out.
    harness.chain.mine_empty(80);
    harness.clock.advance(600);

    let again = within(harness.watcher().watch(expectation).expect("watch").wait())
        .await
        .expect("verdict");
    assert_eq!(again, verdict);
    assert_eq!(harness.watcher().active_watches(), 0);
    harness.assert_no_event().await;
    harness.teardown();
}

#[tokio::test]
async fn test_independent_orders_do_not_interfere() {
    let harness = TestHarness::setup().await;
    let paid = harness
        .watcher()
        .watch(harness.expectation("order-10", 100))
        .expect("watch");
    let unpaid = harness
        .watcher()
        .watch(harness.expectation("order-11", 5_000))
        .expect("watch");

    harness.pay("0x3301", 100);
    harness.chain.mine_empty(12);

    assert!(within(paid.wait()).await.expect("verdict").is_confirmed());
    assert!(!unpaid.status().is_final());

    unpaid.cancel();
    assert_eq!(within(unpaid.wait()).await, None);
    harness.teardown();
}

#[tokio::test]
async fn test_unknown_chain_and_shutdown() {
    let harness = TestHarness::setup().await;

    let expectation = PaymentExpectation::new(
        Chain::new("BSC"),
        "order-12",
        SHOP,
        Amount::new(100),
        Tolerance::default(),
        NOW,
    )
    .expect("valid");
    assert!(matches!(
        harness.watcher().watch(expectation),
        Err(Error::UnknownChain(_))
    ));

    harness.watcher().shutdown();
    assert!(matches!(
        harness.watcher().watch(harness.expectation("order-13", 100)),
        Err(Error::ShuttingDown)
    ));
    harness.teardown();
}

#[tokio::test]
async fn test_contract_creation_is_not_a_candidate() {
    let harness = TestHarness::setup().await;
    let handle = harness
        .watcher()
        .watch(harness.expectation("order-14", 100))
        .expect("watch");

    let mut creation = InMemoryChain::transfer("0x4401", "", 100);
    creation.to = None;
    harness.chain.mine(vec![creation]);
    harness.chain.mine_empty(12);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.status().is_final());
    handle.cancel();
    harness.teardown();
}
