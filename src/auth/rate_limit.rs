//! Fixed-window rate limiting keyed by client identity.
//!
//! Buckets are tracked in an LRU so an attacker rotating identities can only
//! evict idle buckets, never grow memory without bound.

use crate::auth::AuthError;
use crate::config::RateLimitScope;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::debug;

/// Key used for [`RateLimitScope::Global`].
const GLOBAL_KEY: &str = "*";

#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Index of the fixed window this bucket counts (`now / window_secs`).
    window: u64,
    count: u32,
}

/// Fixed-window request counter.
pub struct RateLimiter {
    limit: u32,
    window_secs: u64,
    scope: RateLimitScope,
    buckets: Mutex<LruCache<String, Bucket>>,
}

impl RateLimiter {
    /// Create a limiter admitting `limit` requests per `window_secs`.
    ///
    /// A zero window is treated as one second.
    #[must_use]
    pub fn new(limit: u32, window_secs: u64, scope: RateLimitScope, max_clients: usize) -> Self {
        let cap = NonZeroUsize::new(max_clients).unwrap_or(NonZeroUsize::MIN);
        Self {
            limit,
            window_secs: window_secs.max(1),
            scope,
            buckets: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Admit or refuse one request.
    ///
    /// Counters only ever move to a later window, so a clock stepping
    /// backwards never grants an extra reset.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RateLimited`] once the bucket holds `limit`
    /// admitted requests for the current window.
    pub fn check(&self, client: &str, path: &str, now: u64) -> Result<(), AuthError> {
        let key = self.key(client, path);
        let window = now / self.window_secs;

        let mut buckets = self.buckets.lock();
        let bucket = buckets.get_or_insert_mut(key, || Bucket { window, count: 0 });

        if window > bucket.window {
            bucket.window = window;
            bucket.count = 0;
        }

        if bucket.count >= self.limit {
            debug!(
                "Rate limit reached for {} ({} requests in window {})",
                client, bucket.count, bucket.window
            );
            return Err(AuthError::RateLimited);
        }

        bucket.count += 1;
        Ok(())
    }

    /// Requests admitted so far in the bucket for `client`/`path`, if tracked.
    #[must_use]
    pub fn admitted(&self, client: &str, path: &str) -> Option<u32> {
        let key = self.key(client, path);
        self.buckets.lock().peek(&key).map(|b| b.count)
    }

    /// Number of buckets currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }

    fn key(&self, client: &str, path: &str) -> String {
        match self.scope {
            RateLimitScope::Global => GLOBAL_KEY.to_string(),
            RateLimitScope::Client => client.to_string(),
            RateLimitScope::ClientPath => format!("{client} {path}"),
        }
    }
}
