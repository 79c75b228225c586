//! Confirmation depth, reorg and corroboration checks.

use crate::chain::{ChainClient, ExplorerClient, ExplorerStatus};
use crate::error::Result;
use crate::payment::{
    CandidateTransaction, ChainPolicy, ConfirmationFailure, ConfirmationVerdict,
    PaymentExpectation,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a candidate relates to an expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateMatch {
    /// Right address, enough value.
    Qualified,
    /// Paid somewhere else.
    WrongAddress,
    /// Right address, below the accepted minimum.
    Underpaid,
}

/// Decides whether a candidate payment is final on one chain.
///
/// Checks run in order: amount and address, confirmation depth, reorg
/// re-fetch of the backing block, then explorer corroboration. A candidate
/// is only `Confirmed` once all of them pass on the same poll.
pub struct ConfirmationTracker {
    policy: ChainPolicy,
    chain: Arc<dyn ChainClient>,
    explorer: Arc<dyn ExplorerClient>,
}

impl ConfirmationTracker {
    /// Create a tracker for one chain.
    #[must_use]
    pub fn new(
        policy: ChainPolicy,
        chain: Arc<dyn ChainClient>,
        explorer: Arc<dyn ExplorerClient>,
    ) -> Self {
        Self {
            policy,
            chain,
            explorer,
        }
    }

    /// Policy in effect.
    #[must_use]
    pub fn policy(&self) -> ChainPolicy {
        self.policy
    }

    /// Classify `candidate` against `expectation`. Addresses compare
    /// case-insensitively.
    #[must_use]
    pub fn qualify(
        &self,
        expectation: &PaymentExpectation,
        candidate: &CandidateTransaction,
    ) -> CandidateMatch {
        if !candidate
            .to_address
            .eq_ignore_ascii_case(expectation.expected_address())
        {
            return CandidateMatch::WrongAddress;
        }
        if candidate.amount < expectation.min_acceptable() {
            return CandidateMatch::Underpaid;
        }
        CandidateMatch::Qualified
    }

    /// Evaluate `candidates` against `expectation` with the chain at `head`.
    ///
    /// The first qualifying candidate is the one tracked. With none, the
    /// verdict is `Pending { confirmations: 0 }`.
    ///
    /// # Errors
    ///
    /// Returns an error when the chain or explorer cannot be reached. Such
    /// errors are transient; the caller retries on a later head.
    pub async fn evaluate(
        &self,
        expectation: &PaymentExpectation,
        candidates: &[CandidateTransaction],
        head: u64,
    ) -> Result<ConfirmationVerdict> {
        let mut chosen = None;
        for candidate in candidates {
            match self.qualify(expectation, candidate) {
                CandidateMatch::Qualified => {
                    chosen = Some(candidate);
                    break;
                }
                CandidateMatch::Underpaid => debug!(
                    "Candidate {} for order {} pays {} < {}",
                    candidate.hash,
                    expectation.order_id(),
                    candidate.amount,
                    expectation.min_acceptable()
                ),
                CandidateMatch::WrongAddress => {}
            }
        }

        let Some(candidate) = chosen else {
            return Ok(ConfirmationVerdict::Pending { confirmations: 0 });
        };

        let confirmations = head.saturating_sub(candidate.block_number);
        let required = self.policy.required_confirmations;

        if (confirmations >= required || confirmations > self.policy.reorg_depth)
            && !self.still_included(candidate).await?
        {
            warn!(
                "Transaction {} for order {} no longer in block {}",
                candidate.hash,
                expectation.order_id(),
                candidate.block_number
            );
            return Ok(ConfirmationVerdict::Rejected {
                reason: ConfirmationFailure::ReorgInvalidated,
            });
        }

        if confirmations < required {
            debug!(
                "Order {}: {} has {}/{} confirmations",
                expectation.order_id(),
                candidate.hash,
                confirmations,
                required
            );
            return Ok(ConfirmationVerdict::Pending { confirmations });
        }

        if let Some(reason) = self.corroborate(candidate).await? {
            warn!(
                "Explorer disagrees on {} for order {}: {}",
                candidate.hash,
                expectation.order_id(),
                reason
            );
            return Ok(ConfirmationVerdict::Rejected {
                reason: ConfirmationFailure::CorroborationFailed,
            });
        }

        if candidate.amount > expectation.expected_amount() {
            info!(
                "Order {} overpaid: expected {}, received {}",
                expectation.order_id(),
                expectation.expected_amount(),
                candidate.amount
            );
        }

        info!(
            "Order {} confirmed by {} at block {} ({} confirmations)",
            expectation.order_id(),
            candidate.hash,
            candidate.block_number,
            confirmations
        );

        Ok(ConfirmationVerdict::Confirmed {
            tx_hash: candidate.hash.clone(),
            block_number: candidate.block_number,
            amount: candidate.amount,
        })
    }

    /// Re-fetch the candidate's block and transaction; both must still
    /// place it at the same height.
    async fn still_included(&self, candidate: &CandidateTransaction) -> Result<bool> {
        let Some(block) = self.chain.get_block(candidate.block_number).await? else {
            return Ok(false);
        };
        if !block.contains_tx(&candidate.hash) {
            return Ok(false);
        }

        let tx = self.chain.get_transaction(&candidate.hash).await?;
        Ok(tx.and_then(|tx| tx.block_number) == Some(candidate.block_number))
    }

    /// `None` when the explorer agrees, otherwise a description of the
    /// disagreement.
    async fn corroborate(&self, candidate: &CandidateTransaction) -> Result<Option<String>> {
        let info = self.explorer.tx_info(&candidate.hash).await?;

        let disagreement = match (info.status, info.block_number) {
            (ExplorerStatus::Success, Some(n)) if n == candidate.block_number => None,
            (ExplorerStatus::Success, Some(n)) => Some(format!(
                "block {n}, chain says {}",
                candidate.block_number
            )),
            (ExplorerStatus::Success, None) => Some("no block number".to_string()),
            (ExplorerStatus::Failed, _) => Some("transaction failed".to_string()),
            (ExplorerStatus::NotFound, _) => Some("transaction unknown".to_string()),
        };
        Ok(disagreement)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::chain::memory::{InMemoryChain, InMemoryExplorer};
    use crate::chain::ExplorerTxInfo;
    use crate::payment::{Amount, Chain, Tolerance};
    use proptest::prelude::*;

    const SHOP: &str = "0xShop";

    struct Fixture {
        chain: InMemoryChain,
        explorer: InMemoryExplorer,
        tracker: ConfirmationTracker,
    }

    fn fixture() -> Fixture {
        let chain = InMemoryChain::new();
        let explorer = InMemoryExplorer::new();
        let tracker = ConfirmationTracker::new(
            ChainPolicy::builtin("ETH"),
            Arc::new(chain.clone()),
            Arc::new(explorer.clone()),
        );
        Fixture {
            chain,
            explorer,
            tracker,
        }
    }

    fn expectation() -> PaymentExpectation {
        PaymentExpectation::new(
            Chain::new("ETH"),
            "order-7",
            SHOP,
            Amount::new(100),
            Tolerance::from_fraction(0.05).expect("valid"),
            0,
        )
        .expect("valid")
    }

    /// Mine `value` to the shop, return its candidate.
    fn pay(f: &Fixture, hash: &str, value: u128) -> CandidateTransaction {
        let n = f
            .chain
            .mine(vec![InMemoryChain::transfer(hash, "0xshop", value)]);
        CandidateTransaction {
            hash: hash.to_string(),
            to_address: "0xshop".to_string(),
            amount: Amount::new(value),
            block_number: n,
            block_timestamp: 0,
        }
    }

    #[test]
    fn test_qualify() {
        let f = fixture();
        let exp = expectation();
        let mut c = pay(&f, "0xaa", 96);
        assert_eq!(f.tracker.qualify(&exp, &c), CandidateMatch::Qualified);

        c.amount = Amount::new(95);
        assert_eq!(f.tracker.qualify(&exp, &c), CandidateMatch::Qualified);
        c.amount = Amount::new(94);
        assert_eq!(f.tracker.qualify(&exp, &c), CandidateMatch::Underpaid);

        c.to_address = "0xelsewhere".to_string();
        assert_eq!(f.tracker.qualify(&exp, &c), CandidateMatch::WrongAddress);
    }

    #[tokio::test]
    async fn test_confirms_at_required_depth() {
        let f = fixture();
        let exp = expectation();
        let c = pay(&f, "0xaa", 96);
        f.explorer
            .set("0xaa", ExplorerTxInfo::success(c.block_number));

        let head = f.chain.mine_empty(11);
        let verdict = f
            .tracker
            .evaluate(&exp, std::slice::from_ref(&c), head)
            .await
            .expect("evaluates");
        assert_eq!(verdict, ConfirmationVerdict::Pending { confirmations: 11 });

        let head = f.chain.mine_empty(1);
        let verdict = f
            .tracker
            .evaluate(&exp, std::slice::from_ref(&c), head)
            .await
            .expect("evaluates");
        assert_eq!(
            verdict,
            ConfirmationVerdict::Confirmed {
                tx_hash: "0xaa".to_string(),
                block_number: c.block_number,
                amount: Amount::new(96),
            }
        );
    }

    #[tokio::test]
    async fn test_no_candidate_is_pending() {
        let f = fixture();
        let verdict = f
            .tracker
            .evaluate(&expectation(), &[], 100)
            .await
            .expect("evaluates");
        assert_eq!(verdict, ConfirmationVerdict::Pending { confirmations: 0 });
    }

    #[tokio::test]
    async fn test_underpaid_candidate_is_skipped() {
        let f = fixture();
        let short = pay(&f, "0xaa", 90);
        let good = pay(&f, "0xbb", 100);
        f.explorer
            .set("0xbb", ExplorerTxInfo::success(good.block_number));
        let head = f.chain.mine_empty(20);

        let verdict = f
            .tracker
            .evaluate(&expectation(), &[short, good], head)
            .await
            .expect("evaluates");
        assert!(matches!(
            verdict,
            ConfirmationVerdict::Confirmed { ref tx_hash, .. } if tx_hash == "0xbb"
        ));
    }

    #[tokio::test]
    async fn test_explorer_block_mismatch() {
        let f = fixture();
        let c = pay(&f, "0xaa", 100);
        f.explorer
            .set("0xaa", ExplorerTxInfo::success(c.block_number + 1));
        let head = f.chain.mine_empty(12);

        let verdict = f
            .tracker
            .evaluate(&expectation(), &[c], head)
            .await
            .expect("evaluates");
        assert_eq!(
            verdict.rejection(),
            Some(ConfirmationFailure::CorroborationFailed)
        );
    }

    #[tokio::test]
    async fn test_explorer_unknown_or_failed() {
        let f = fixture();
        let c = pay(&f, "0xaa", 100);
        let head = f.chain.mine_empty(12);

        let verdict = f
            .tracker
            .evaluate(&expectation(), std::slice::from_ref(&c), head)
            .await
            .expect("evaluates");
        assert_eq!(
            verdict.rejection(),
            Some(ConfirmationFailure::CorroborationFailed)
        );

        f.explorer.set(
            "0xaa",
            ExplorerTxInfo {
                status: ExplorerStatus::Failed,
                block_number: Some(c.block_number),
            },
        );
        let verdict = f
            .tracker
            .evaluate(&expectation(), &[c], head)
            .await
            .expect("evaluates");
        assert_eq!(
            verdict.rejection(),
            Some(ConfirmationFailure::CorroborationFailed)
        );
    }

    #[tokio::test]
    async fn test_explorer_outage_is_transient() {
        let f = fixture();
        let c = pay(&f, "0xaa", 100);
        let head = f.chain.mine_empty(12);
        f.explorer.set_unavailable(true);

        assert!(f.tracker.evaluate(&expectation(), &[c], head).await.is_err());
    }

    #[tokio::test]
    async fn test_reorged_block_is_rejected() {
        let f = fixture();
        let c = pay(&f, "0xaa", 100);
        f.explorer
            .set("0xaa", ExplorerTxInfo::success(c.block_number));
        let head = f.chain.mine_empty(12);

        f.chain.replace_block(c.block_number, Vec::new());

        let verdict = f
            .tracker
            .evaluate(&expectation(), &[c], head)
            .await
            .expect("evaluates");
        assert_eq!(
            verdict.rejection(),
            Some(ConfirmationFailure::ReorgInvalidated)
        );
    }

    #[tokio::test]
    async fn test_missing_block_is_rejected() {
        let f = fixture();
        let c = pay(&f, "0xaa", 100);
        f.explorer
            .set("0xaa", ExplorerTxInfo::success(c.block_number));
        let head = f.chain.mine_empty(13);
        f.chain.remove_block(c.block_number);

        let verdict = f
            .tracker
            .evaluate(&expectation(), &[c], head)
            .await
            .expect("evaluates");
        assert_eq!(
            verdict.rejection(),
            Some(ConfirmationFailure::ReorgInvalidated)
        );
    }

    #[tokio::test]
    async fn test_pending_below_reorg_depth_skips_refetch() {
        let f = fixture();
        let c = pay(&f, "0xaa", 100);
        let head = f.chain.mine_empty(3);
        // Chain unreachable: a shallow candidate must not need it.
        f.chain.set_unavailable(true);

        let verdict = f
            .tracker
            .evaluate(&expectation(), &[c], head)
            .await
            .expect("evaluates");
        assert_eq!(verdict, ConfirmationVerdict::Pending { confirmations: 3 });
    }

    proptest! {
        #[test]
        fn prop_qualification_matches_threshold(amount in 0u128..200) {
            let f = fixture();
            let exp = expectation();
            let c = CandidateTransaction {
                hash: "0xaa".to_string(),
                to_address: "0xSHOP".to_string(),
                amount: Amount::new(amount),
                block_number: 1,
                block_timestamp: 0,
            };
            let expected = if amount >= 95 {
                CandidateMatch::Qualified
            } else {
                CandidateMatch::Underpaid
            };
            prop_assert_eq!(f.tracker.qualify(&exp, &c), expected);
        }
    }
}
