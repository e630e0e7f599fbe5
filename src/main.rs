//! Bundle bot
//!
//! Command line entry point for the multi-wallet bundle pipeline.
//!
//! ## Commands
//!
//! - **run**: prepare, submit and poll until the bundle lands
//! - **prepare**: prepare one bundle and write the checkpoint only
//! - **submit-checkpoint**: resubmit the checkpointed transactions
//! - **status**: query the relay for a bundle id

// Compiler warning configuration
#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use bundle_bot::chain::RpcChainState;
use bundle_bot::config::Config;
use bundle_bot::market::HttpMarketMaker;
use bundle_bot::metrics::metrics;
use bundle_bot::pipeline::{BundlePipeline, PipelineSettings};
use bundle_bot::structured_logging::PipelineContext;
use bundle_bot::tx_builder::{
    BundleId, BundleRelay, CommandRecovery, JitoRelayClient, NoopRecovery, RecoveryStrategy,
    StatusPoller, TokioSleeper, TradeSizer, TransactionComposer, UniformSelector,
    MAX_BUNDLE_TRANSACTIONS,
};
use bundle_bot::wallet::{KeyDirectory, Wallet, WalletSource};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "BUNDLE_BOT_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare, submit and poll one bundle
    Run,
    /// Prepare one bundle and write the checkpoint without submitting
    Prepare,
    /// Submit the transactions stored in the checkpoint
    SubmitCheckpoint {
        /// Transactions to read from the checkpoint
        #[arg(long, default_value_t = MAX_BUNDLE_TRANSACTIONS)]
        limit: usize,
    },
    /// Query the relay for a bundle's status
    Status {
        bundle_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting bundle bot");
    info!(path = %args.config.display(), "Loading configuration");
    let config = Config::from_file_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let result = match args.command {
        Command::Run => run(&config).await,
        Command::Prepare => prepare(&config).await,
        Command::SubmitCheckpoint { limit } => submit_checkpoint(&config, limit).await,
        Command::Status { bundle_id } => query_status(&config, &bundle_id).await,
    };

    match metrics().render() {
        Ok(text) => debug!(metrics = %text, "Final metrics"),
        Err(e) => warn!(error = %e, "Failed to render metrics"),
    }

    result
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "bundle_bot=debug,bundle_bot::tx_builder=debug,info"
    } else {
        "bundle_bot=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
            .context("Failed to initialize logging")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .context("Failed to initialize logging")?;
    }

    Ok(())
}

fn relay_client(config: &Config) -> Result<JitoRelayClient> {
    JitoRelayClient::new(
        config.relay.url.clone(),
        config.relay.request_id,
        Duration::from_secs(config.relay.timeout_secs),
    )
    .context("Failed to create relay client")
}

async fn query_status(config: &Config, bundle_id: &str) -> Result<()> {
    let relay = relay_client(config)?;
    let id = BundleId::new(bundle_id);

    let landed = relay
        .get_bundle_status(&id)
        .await
        .context("getBundleStatuses failed")?;
    let inflight = relay
        .get_inflight_status(&id)
        .await
        .context("getInflightBundleStatuses failed")?;

    let report = serde_json::json!({
        "bundle_id": id,
        "landed": landed,
        "inflight": inflight,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let ctx = PipelineContext::new("run");

    let report = pipeline.run(&ctx).await.context("Bundle pipeline failed")?;
    info!(
        bundle_id = %report.bundle_id,
        legs = report.legs.len(),
        dropped = report.dropped.len(),
        restarts = report.restarts,
        "Bundle landed"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn prepare(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let ctx = PipelineContext::new("prepare");

    let prepared = pipeline.prepare(&ctx).await.context("Bundle preparation failed")?;
    let summary = serde_json::json!({
        "blockhash": prepared.bundle.blockhash().to_string(),
        "legs": prepared.legs,
        "dropped": prepared.dropped,
        "checkpoint": pipeline.settings().checkpoint_path,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn submit_checkpoint(config: &Config, limit: usize) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let ctx = PipelineContext::new("submit_checkpoint");

    let (bundle_id, outcome) = pipeline
        .submit_checkpoint(&ctx, limit)
        .await
        .context("Checkpoint submission failed")?;
    info!(bundle_id = %bundle_id, landed = outcome.is_landed(), "Checkpoint submitted");
    println!("{}", bundle_id);
    let status = outcome
        .into_landed()
        .with_context(|| format!("Bundle {} did not land", bundle_id))?;
    debug!(status = %status, "Checkpointed bundle landed");
    Ok(())
}

fn build_pipeline(config: &Config) -> Result<BundlePipeline> {
    config.validate().context("Invalid configuration")?;
    let mint = config.mint()?;

    let wallets = KeyDirectory::new(&config.wallets.keys_directory)
        .load_signers(config.wallets.wallet_count)
        .context("Failed to load trading wallets")?;
    let tip_payer = Wallet::from_file(&config.wallets.tip_payer_keypair)
        .with_context(|| format!("Failed to load tip payer {}", config.wallets.tip_payer_keypair))?;
    for wallet in &wallets {
        info!(wallet = %wallet.pubkey(), "Trading wallet loaded");
    }
    info!(wallet = %tip_payer.pubkey(), "Tip payer loaded");

    let chain = Arc::new(RpcChainState::new(
        config.rpc.url.clone(),
        config.commitment()?,
        Duration::from_secs(config.rpc.timeout_secs),
    ));
    let market = Arc::new(
        HttpMarketMaker::new(
            config.market.instruction_service_url.clone(),
            mint,
            Duration::from_secs(config.market.timeout_secs),
        )
        .context("Failed to create market client")?,
    );
    let relay = Arc::new(relay_client(config)?);

    let composer = TransactionComposer::new(
        mint,
        config.leg_policy()?,
        TradeSizer::new(
            config.policy.buy_fractions.clone(),
            Box::new(UniformSelector::new()),
        )?,
        TradeSizer::new(
            config.policy.sell_fractions.clone(),
            Box::new(UniformSelector::new()),
        )?,
    );
    let poller = StatusPoller::new(
        config.relay.poll_attempts,
        config.poll_delay(),
        Arc::new(TokioSleeper),
    )
    .with_inflight_probe(config.relay.inflight_probe);

    let recovery: Arc<dyn RecoveryStrategy> = if config.pipeline.recovery_command.is_empty() {
        Arc::new(NoopRecovery)
    } else {
        Arc::new(CommandRecovery::from_argv(&config.pipeline.recovery_command)?)
    };

    Ok(BundlePipeline::new(chain, market, relay, composer, poller, wallets, tip_payer)
        .with_recovery(recovery)
        .with_settings(PipelineSettings::from_config(config)))
}
