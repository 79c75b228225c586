//! Timestamp-windowed HMAC authentication with replay defense.

use crate::auth::signing::{canonical_string, mac_for};
use crate::auth::{AuthError, AuthenticatedRequest, RateLimiter};
use crate::clock::Clock;
use crate::config::{AuthConfig, HmacSecret};
use crate::idempotency::{Fingerprint, IdempotencyStore};
use hmac::Mac;
use std::sync::Arc;
use tracing::{debug, warn};

/// Validates inbound requests before anything else touches them.
pub struct RequestAuthenticator {
    secret: HmacSecret,
    replay_window_secs: u64,
    sweep_budget: usize,
    store: Arc<dyn IdempotencyStore>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl RequestAuthenticator {
    /// Create an authenticator over an injected fingerprint store.
    ///
    /// The store may be shared between instances (or backed by a shared
    /// cache) without changing behavior.
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn IdempotencyStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(
            config.rate_limit_per_window,
            config.rate_limit_window_secs,
            config.rate_limit_scope,
            config.max_tracked_clients,
        );

        Self {
            secret: config.hmac_secret.clone(),
            replay_window_secs: config.replay_window_secs,
            sweep_budget: config.sweep_budget,
            store,
            limiter,
            clock,
        }
    }

    /// Authenticate `request` against the configured secret.
    ///
    /// # Errors
    ///
    /// Returns the first failed check. Callers must surface only
    /// [`AuthError::rejection`] to the client.
    pub fn authenticate(&self, request: &AuthenticatedRequest) -> Result<(), AuthError> {
        self.authenticate_with(request, self.secret.as_bytes())
    }

    /// Authenticate `request` against an explicit secret, for endpoints
    /// that sign with a per-module key.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub fn authenticate_with(
        &self,
        request: &AuthenticatedRequest,
        secret: &[u8],
    ) -> Result<(), AuthError> {
        let now = self.clock.now_secs();
        let result = self.check(request, secret, now);

        match result {
            Ok(()) => debug!(
                "Authenticated {} {} from {}",
                request.method, request.path, request.client
            ),
            Err(reason) => warn!(
                "Rejected {} {} from {}: {}",
                request.method, request.path, request.client, reason
            ),
        }
        result
    }

    fn check(
        &self,
        request: &AuthenticatedRequest,
        secret: &[u8],
        now: u64,
    ) -> Result<(), AuthError> {
        // Cheapest gate first: abusive clients never reach HMAC work.
        self.limiter.check(&request.client, &request.path, now)?;

        let (Some(timestamp), Some(signature)) =
            (request.timestamp.as_deref(), request.signature.as_deref())
        else {
            return Err(AuthError::MissingCredentials);
        };
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| AuthError::MissingCredentials)?;

        let now_signed = i64::try_from(now).unwrap_or(i64::MAX);
        if now_signed.abs_diff(timestamp) > self.replay_window_secs {
            return Err(AuthError::WindowExceeded);
        }

        let fingerprint =
            Fingerprint::for_request(timestamp, &request.method, &request.path, &request.body);
        if self.store.contains(&fingerprint) {
            return Err(AuthError::ReplayDetected);
        }

        let supplied = hex::decode(signature).map_err(|_| AuthError::InvalidSignature)?;
        let canonical = canonical_string(timestamp, &request.method, &request.path, &request.body);
        mac_for(secret, &canonical)
            .verify_slice(&supplied)
            .map_err(|_| AuthError::InvalidSignature)?;

        // Anchor retention at the later of receipt and the claimed timestamp,
        // so a future-skewed request is remembered until its own window closes.
        let anchor = now.max(u64::try_from(timestamp).unwrap_or(0));
        if !self.store.insert(fingerprint, anchor) {
            // Lost a race with a concurrent delivery of the same request.
            return Err(AuthError::ReplayDetected);
        }

        self.store
            .sweep_bounded(now, self.replay_window_secs, self.sweep_budget);
        Ok(())
    }

    /// The fingerprint store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    /// The rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Replay window in seconds.
    #[must_use]
    pub fn replay_window_secs(&self) -> u64 {
        self.replay_window_secs
    }
}
