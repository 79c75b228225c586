//! Background sweep tick for idempotency stores.

use crate::clock::Clock;
use crate::idempotency::IdempotencyStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawn a task that fully sweeps `store` every `interval`, logging its
/// counters under `name`.
///
/// Records therefore never outlive their retention by more than one
/// interval. The task exits when `shutdown` flips to `true` or its sender is
/// dropped.
pub fn spawn_sweeper(
    name: &'static str,
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    retention_secs: u64,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Idempotency sweeper for {} started (retention={}s, interval={:?})",
            name, retention_secs, interval
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let removed = store.sweep(clock.now_secs(), retention_secs);
                    let stats = store.stats();
                    debug!(
                        "{} store: removed {}, retained {} (inserted {}, duplicates {}, swept {})",
                        name,
                        removed,
                        store.len(),
                        stats.inserted,
                        stats.duplicates,
                        stats.swept
                    );
                }
            }
        }

        debug!("Idempotency sweeper for {} stopped", name);
    })
}
