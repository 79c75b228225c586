//! Command-line interface definition.

use clap::{Args, Parser, Subcommand};
use payguard::config::default_config_path;
use payguard::{GuardConfig, HmacSecret};
use std::path::PathBuf;

/// Replay-safe request authentication and reorg-aware payment confirmation.
#[derive(Parser, Debug)]
#[command(name = "payguard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, global = true, env = "PAYGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Shared HMAC secret (hex). Overrides the config file.
    #[arg(long, global = true, env = "PAYGUARD_HMAC_SECRET", hide_env_values = true)]
    pub hmac_secret: Option<String>,

    /// Log level.
    #[arg(long, global = true, env = "RUST_LOG")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print authentication headers for a request.
    Sign(SignArgs),

    /// Check a signed request against the configured secret.
    Verify(VerifyArgs),

    /// Watch for a payment and print verdicts until a terminal one.
    Watch(WatchArgs),

    /// Write a default configuration file.
    InitConfig {
        /// Destination; defaults to the platform config directory.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Request fields shared by `sign` and `verify`.
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// HTTP method.
    #[arg(long, short = 'X', default_value = "POST")]
    pub method: String,

    /// Request path.
    #[arg(long, short)]
    pub path: String,

    /// Request body.
    #[arg(long, short, default_value = "")]
    pub body: String,

    /// Re-serialize a JSON body with sorted keys before signing.
    #[arg(long)]
    pub canonical_json: bool,
}

/// Arguments for `sign`.
#[derive(Args, Debug)]
pub struct SignArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Unix timestamp; defaults to now.
    #[arg(long, short)]
    pub timestamp: Option<i64>,
}

/// Arguments for `verify`.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Value of the timestamp header.
    #[arg(long, short)]
    pub timestamp: String,

    /// Value of the signature header.
    #[arg(long, short)]
    pub signature: String,
}

/// Arguments for `watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Chain name (must be configured).
    #[arg(long)]
    pub chain: String,

    /// Order identifier.
    #[arg(long)]
    pub order_id: String,

    /// Receiving address.
    #[arg(long)]
    pub address: String,

    /// Expected amount in base units.
    #[arg(long)]
    pub amount: u128,

    /// Allowed shortfall fraction; defaults to the configured value.
    #[arg(long)]
    pub tolerance: Option<f64>,
}

impl Cli {
    /// Resolve the configuration: file (explicit, or the default location
    /// if present), then CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be loaded or the secret is
    /// not valid hex.
    pub fn load_config(&self) -> color_eyre::Result<GuardConfig> {
        let mut config = match &self.config {
            Some(path) => GuardConfig::from_file(path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    GuardConfig::from_file(&path)?
                } else {
                    GuardConfig::default()
                }
            }
        };

        if let Some(secret) = &self.hmac_secret {
            config.auth.hmac_secret = HmacSecret::from_hex(secret)?;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }

        Ok(config)
    }
}

impl RequestArgs {
    /// Body bytes as they are signed.
    ///
    /// # Errors
    ///
    /// Returns an error if `--canonical-json` is set and the body is not
    /// JSON.
    pub fn body_bytes(&self) -> color_eyre::Result<Vec<u8>> {
        if self.canonical_json && !self.body.is_empty() {
            let value: serde_json::Value = serde_json::from_str(&self.body)?;
            Ok(payguard::auth::canonical_body(&value))
        } else {
            Ok(self.body.as_bytes().to_vec())
        }
    }
}
