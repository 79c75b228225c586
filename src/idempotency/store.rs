//! In-process idempotency store.
//!
//! Records live in a hash map for O(1) duplicate checks and in an
//! insertion-ordered queue so expiry can be amortized across calls.

use crate::idempotency::{is_expired, Fingerprint, IdempotencyStore};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// In-memory [`IdempotencyStore`].
///
/// Cloning yields another handle to the same records.
#[derive(Clone, Default)]
pub struct MemoryIdempotencyStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<Fingerprint, u64>,
    order: VecDeque<(u64, Fingerprint)>,
    stats: StoreStats,
}

/// Running counters, logged by the sweeper on every tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of fingerprints recorded.
    pub inserted: u64,
    /// Number of inserts rejected because the fingerprint was present.
    pub duplicates: u64,
    /// Number of records removed by sweeps.
    pub swept: u64,
}

impl MemoryIdempotencyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyStore for MemoryIdempotencyStore {
    fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.lock().records.contains_key(fingerprint)
    }

    fn insert(&self, fingerprint: Fingerprint, at: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.records.contains_key(&fingerprint) {
            inner.stats.duplicates += 1;
            return false;
        }

        inner.records.insert(fingerprint, at);
        inner.order.push_back((at, fingerprint));
        inner.stats.inserted += 1;
        true
    }

    fn sweep(&self, now: u64, window_secs: u64) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let before = inner.records.len();
        inner
            .records
            .retain(|_, at| !is_expired(*at, now, window_secs));
        let records = &inner.records;
        inner
            .order
            .retain(|(at, fp)| records.get(fp) == Some(at));

        let removed = before - inner.records.len();
        inner.stats.swept += removed as u64;
        if removed > 0 {
            debug!("Swept {} expired fingerprints ({} retained)", removed, inner.records.len());
        }
        removed
    }

    fn sweep_bounded(&self, now: u64, window_secs: u64, budget: usize) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let mut removed = 0;
        while removed < budget {
            match inner.order.front() {
                Some(&(at, fp)) if is_expired(at, now, window_secs) => {
                    inner.order.pop_front();
                    if inner.records.get(&fp) == Some(&at) {
                        inner.records.remove(&fp);
                    }
                    removed += 1;
                }
                _ => break,
            }
        }

        inner.stats.swept += removed as u64;
        removed
    }

    fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    fn stats(&self) -> StoreStats {
        self.inner.lock().stats.clone()
    }
}
