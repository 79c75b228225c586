//! Configuration for payguard.

use crate::payment::{ChainPolicy, Tolerance};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Scope of the rate-limit bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// One bucket for every caller.
    Global,
    /// One bucket per client identity.
    #[default]
    Client,
    /// One bucket per client identity and request path.
    ClientPath,
}

/// Shared HMAC key.
///
/// Serialized as hex; never rendered by `Debug`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HmacSecret(Vec<u8>);

impl HmacSecret {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a hex-encoded key.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid hex.
    pub fn from_hex(encoded: &str) -> crate::Result<Self> {
        hex::decode(encoded.trim())
            .map(Self)
            .map_err(|e| crate::Error::Config(format!("hmac secret is not valid hex: {e}")))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether no key is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for HmacSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HmacSecret(<{} bytes redacted>)", self.0.len())
    }
}

impl Serialize for HmacSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for HmacSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded.trim())
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Request authentication settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Payment watcher settings.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Per-chain endpoints and finality policy, keyed by chain name.
    #[serde(default)]
    pub chains: BTreeMap<String, ChainConfig>,
}

/// Request authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared HMAC key (hex).
    #[serde(default)]
    pub hmac_secret: HmacSecret,

    /// Accepted clock skew, and retention of replay fingerprints.
    #[serde(default = "default_replay_window")]
    pub replay_window_secs: u64,

    /// Requests admitted per client per rate-limit window.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_window: u32,

    /// Rate-limit bucket width.
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    /// How rate-limit buckets are keyed.
    #[serde(default)]
    pub rate_limit_scope: RateLimitScope,

    /// Maximum number of client buckets tracked at once.
    #[serde(default = "default_max_tracked_clients")]
    pub max_tracked_clients: usize,

    /// Expired fingerprints removed per successful authentication.
    #[serde(default = "default_sweep_budget")]
    pub sweep_budget: usize,

    /// Interval of the background full sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Payment watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Allowed shortfall as a fraction of the expected amount.
    #[serde(default = "default_tolerance")]
    pub tolerance_fraction: f64,

    /// Absolute age after which an expectation is rejected as expired.
    #[serde(default = "default_expectation_timeout")]
    pub expectation_timeout_secs: u64,

    /// How often each chain's head is polled.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Blocks behind the head at which a new watch starts scanning.
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,

    /// Retention of confirmed-payment fingerprints.
    #[serde(default = "default_processed_retention")]
    pub processed_retention_secs: u64,

    /// Settled watch keys remembered so a re-watch replays the final verdict.
    #[serde(default = "default_settled_capacity")]
    pub settled_capacity: usize,
}

/// Per-chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint.
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Block-explorer API base URL used for corroboration.
    #[serde(default)]
    pub explorer_url: Option<String>,

    /// Explorer API key.
    #[serde(default)]
    pub explorer_api_key: Option<String>,

    /// Confirmations required before a payment can be confirmed.
    #[serde(default)]
    pub required_confirmations: Option<u64>,

    /// Depth beyond which the backing block is re-fetched.
    #[serde(default)]
    pub reorg_depth: Option<u64>,

    /// Timeout for individual RPC and explorer requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            auth: AuthConfig::default(),
            watcher: WatcherConfig::default(),
            chains: BTreeMap::new(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            explorer_url: None,
            explorer_api_key: None,
            required_confirmations: None,
            reorg_depth: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            hmac_secret: HmacSecret::default(),
            replay_window_secs: default_replay_window(),
            rate_limit_per_window: default_rate_limit(),
            rate_limit_window_secs: default_rate_limit_window(),
            rate_limit_scope: RateLimitScope::default(),
            max_tracked_clients: default_max_tracked_clients(),
            sweep_budget: default_sweep_budget(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            tolerance_fraction: default_tolerance(),
            expectation_timeout_secs: default_expectation_timeout(),
            poll_interval_ms: default_poll_interval(),
            lookback_blocks: default_lookback_blocks(),
            processed_retention_secs: default_processed_retention(),
            settled_capacity: default_settled_capacity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_replay_window() -> u64 {
    300
}

const fn default_rate_limit() -> u32 {
    100
}

const fn default_rate_limit_window() -> u64 {
    60
}

const fn default_max_tracked_clients() -> usize {
    10_000
}

const fn default_sweep_budget() -> usize {
    16
}

const fn default_sweep_interval() -> u64 {
    30
}

const fn default_tolerance() -> f64 {
    0.05
}

const fn default_expectation_timeout() -> u64 {
    3600
}

const fn default_poll_interval() -> u64 {
    3000
}

const fn default_lookback_blocks() -> u64 {
    64
}

const fn default_processed_retention() -> u64 {
    86_400
}

const fn default_settled_capacity() -> usize {
    10_000
}

const fn default_request_timeout() -> u64 {
    30
}

/// Default config file location (`<config dir>/payguard/config.toml`).
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "payguard")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("payguard.toml"))
}

impl GuardConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that would otherwise fail at runtime.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> crate::Result<()> {
        if self.auth.replay_window_secs == 0 {
            return Err(crate::Error::Config(
                "auth.replay_window_secs must be non-zero".to_string(),
            ));
        }
        if self.auth.rate_limit_window_secs == 0 {
            return Err(crate::Error::Config(
                "auth.rate_limit_window_secs must be non-zero".to_string(),
            ));
        }
        if self.watcher.poll_interval_ms == 0 {
            return Err(crate::Error::Config(
                "watcher.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.watcher.settled_capacity == 0 {
            return Err(crate::Error::Config(
                "watcher.settled_capacity must be non-zero".to_string(),
            ));
        }
        self.tolerance()?;
        Ok(())
    }

    /// Tolerance parsed from `watcher.tolerance_fraction`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fraction is outside `[0, 1)`.
    pub fn tolerance(&self) -> crate::Result<Tolerance> {
        Tolerance::from_fraction(self.watcher.tolerance_fraction)
    }

    /// Finality policy for `chain`: configured overrides on top of built-in
    /// defaults.
    #[must_use]
    pub fn chain_policy(&self, chain: &str) -> ChainPolicy {
        let mut policy = ChainPolicy::builtin(chain);
        let key = chain.to_ascii_uppercase();
        if let Some(cfg) = self
            .chains
            .iter()
            .find(|(name, _)| name.to_ascii_uppercase() == key)
            .map(|(_, cfg)| cfg)
        {
            if let Some(required) = cfg.required_confirmations {
                policy.required_confirmations = required;
            }
            if let Some(depth) = cfg.reorg_depth {
                policy.reorg_depth = depth;
            }
        }
        policy
    }
}
