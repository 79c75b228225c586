//! payguard CLI entry point.

mod cli;

use clap::Parser;
use cli::{Cli, Command, SignArgs, VerifyArgs, WatchArgs};
use color_eyre::eyre::{bail, eyre};
use payguard::config::default_config_path;
use payguard::{
    Amount, AuthenticatedRequest, Chain, Clock, ConfirmationVerdict, GuardConfig,
    MemoryIdempotencyStore, PaymentExpectation, RequestAuthenticator, RequestSigner,
    ServiceBuilder, SystemClock, Tolerance,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = cli.load_config()?;

    // Initialize tracing. Logs go to stderr; stdout carries command output.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    info!("payguard v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Sign(args) => sign(&config, &args),
        Command::Verify(args) => verify(&config, &args),
        Command::Watch(args) => watch(config, args).await,
        Command::InitConfig { path, force } => init_config(path, force),
    }
}

fn sign(config: &GuardConfig, args: &SignArgs) -> color_eyre::Result<()> {
    if config.auth.hmac_secret.is_empty() {
        bail!("no HMAC secret configured (set PAYGUARD_HMAC_SECRET or auth.hmac_secret)");
    }
    let timestamp = match args.timestamp {
        Some(ts) => ts,
        None => i64::try_from(SystemClock.now_secs())?,
    };
    let body = args.request.body_bytes()?;

    let signer = RequestSigner::new(config.auth.hmac_secret.clone());
    for (name, value) in signer.headers(timestamp, &args.request.method, &args.request.path, &body)
    {
        println!("{name}: {value}");
    }
    Ok(())
}

fn verify(config: &GuardConfig, args: &VerifyArgs) -> color_eyre::Result<()> {
    let authenticator = RequestAuthenticator::new(
        &config.auth,
        Arc::new(MemoryIdempotencyStore::new()),
        Arc::new(SystemClock),
    );
    let headers = [
        (payguard::auth::TIMESTAMP_HEADER, args.timestamp.as_str()),
        (payguard::auth::SIGNATURE_HEADER, args.signature.as_str()),
    ];
    let request = AuthenticatedRequest::from_headers(
        args.request.method.as_str(),
        args.request.path.as_str(),
        "cli",
        headers,
        args.request.body_bytes()?,
    );

    match authenticator.authenticate(&request) {
        Ok(()) => {
            println!("valid");
            Ok(())
        }
        // The operator holds the secret, so the precise reason is safe here.
        Err(reason) => Err(eyre!("rejected: {reason}")),
    }
}

async fn watch(config: GuardConfig, args: WatchArgs) -> color_eyre::Result<()> {
    let tolerance = match args.tolerance {
        Some(fraction) => Tolerance::from_fraction(fraction)?,
        None => config.tolerance()?,
    };
    let clock = SystemClock;
    let expectation = PaymentExpectation::new(
        Chain::new(&args.chain),
        args.order_id,
        args.address,
        Amount::new(args.amount),
        tolerance,
        clock.now_secs(),
    )?;

    let service = ServiceBuilder::new(config).build().await?;
    let mut handle = service.watcher().watch(expectation)?;

    loop {
        tokio::select! {
            verdict = handle.next() => match verdict {
                Some(verdict) => {
                    print_verdict(&verdict);
                    if verdict.is_terminal() {
                        break;
                    }
                }
                None => {
                    println!("cancelled");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, cancelling watch");
                handle.cancel();
            }
        }
    }

    service.watcher().shutdown();
    Ok(())
}

fn print_verdict(verdict: &ConfirmationVerdict) {
    match serde_json::to_string(verdict) {
        Ok(line) => println!("{line}"),
        Err(_) => println!("{verdict:?}"),
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> color_eyre::Result<()> {
    let path = path.unwrap_or_else(default_config_path);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    GuardConfig::default().to_file(&path)?;
    println!("wrote {}", path.display());
    Ok(())
}
