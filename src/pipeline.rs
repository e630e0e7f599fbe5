//! Bundle pipeline
//!
//! One cycle runs: fresh blockhash, balance refresh, trade legs (composed and
//! simulated one wallet at a time), tip leg, assembly, checkpoint,
//! submission, status polling.
//!
//! Failure handling per cycle:
//! - a trade leg failing with a leg-local error is dropped, the cycle goes on
//! - the tip leg failing aborts the cycle
//! - a failed submission (size, encoding or relay refusal) runs the recovery
//!   strategy once and returns the error
//! - status polling running out of attempts restarts the whole cycle, up to
//!   `max_restarts` times

use crate::chain::ChainState;
use crate::checkpoint::{entries_for_bundle, read_checkpoint, verify_transactions, write_checkpoint};
use crate::config::{Config, Direction};
use crate::market::MarketMaker;
use crate::metrics::{metrics, Timer};
use crate::structured_logging::PipelineContext;
use crate::tx_builder::{
    Bundle, BundleAssembler, BundleContext, BundleError, BundleId, BundleRelay, BundleSubmitter,
    LegOutput, NoopRecovery, PollOutcome, RecoveryReason, RecoveryStrategy, Simulator,
    StatusPoller, TransactionComposer,
};
use crate::wallet::Wallet;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Orchestration knobs
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub direction: Direction,
    /// Prepared transactions are written here before submission
    pub checkpoint_path: Option<PathBuf>,
    pub max_restarts: u32,
    /// Tip payer co-signs every buy leg
    pub cosign_buy_legs: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        let checkpoint = config.pipeline.checkpoint_path.trim();
        Self {
            direction: config.pipeline.direction,
            checkpoint_path: (!checkpoint.is_empty()).then(|| PathBuf::from(checkpoint)),
            max_restarts: config.pipeline.max_restarts,
            cosign_buy_legs: config.wallets.cosign_buy_legs,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            direction: Direction::Buy,
            checkpoint_path: None,
            max_restarts: 1,
            cosign_buy_legs: false,
        }
    }
}

/// A leg included in the submitted bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegSummary {
    pub kind: &'static str,
    pub wallet: String,
    pub amount: u64,
}

impl From<&LegOutput> for LegSummary {
    fn from(leg: &LegOutput) -> Self {
        Self {
            kind: leg.kind.as_str(),
            wallet: leg.wallet.to_string(),
            amount: leg.amount,
        }
    }
}

/// A trade leg left out of the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedLeg {
    pub wallet: String,
    pub category: &'static str,
    pub reason: String,
}

/// Result of a landed run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub bundle_id: BundleId,
    /// Status payload reported by the relay
    pub status: Value,
    pub legs: Vec<LegSummary>,
    pub dropped: Vec<DroppedLeg>,
    pub restarts: u32,
}

/// A bundle ready for submission and what went into it
#[derive(Debug)]
pub struct PreparedBundle {
    pub bundle: Bundle,
    pub context: BundleContext,
    pub legs: Vec<LegSummary>,
    pub dropped: Vec<DroppedLeg>,
}

pub struct BundlePipeline {
    chain: Arc<dyn ChainState>,
    market: Arc<dyn MarketMaker>,
    relay: Arc<dyn BundleRelay>,
    recovery: Arc<dyn RecoveryStrategy>,
    composer: TransactionComposer,
    poller: StatusPoller,
    settings: PipelineSettings,
    wallets: Vec<Wallet>,
    tip_payer: Wallet,
}

impl BundlePipeline {
    pub fn new(
        chain: Arc<dyn ChainState>,
        market: Arc<dyn MarketMaker>,
        relay: Arc<dyn BundleRelay>,
        composer: TransactionComposer,
        poller: StatusPoller,
        wallets: Vec<Wallet>,
        tip_payer: Wallet,
    ) -> Self {
        Self {
            chain,
            market,
            relay,
            recovery: Arc::new(NoopRecovery),
            composer,
            poller,
            settings: PipelineSettings::default(),
            wallets,
            tip_payer,
        }
    }

    pub fn with_recovery(mut self, recovery: Arc<dyn RecoveryStrategy>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Prepare, submit and poll until the bundle lands
    ///
    /// # Errors
    ///
    /// `StatusTimeout` once every restart has been used; otherwise the first
    /// error that is not local to a trade leg.
    pub async fn run(&self, ctx: &PipelineContext) -> Result<PipelineReport, BundleError> {
        let mut restarts = 0u32;

        loop {
            let cycle_ctx = ctx.child("cycle");
            let prepared = self.prepare_cycle(&cycle_ctx, restarts).await?;
            let bundle_id = self
                .submit_encoded(&cycle_ctx, prepared.context.cycle_id, &prepared.bundle.encoded()?)
                .await?;
            cycle_ctx.logger.log_bundle_submitted(
                bundle_id.as_str(),
                prepared.bundle.len(),
                prepared.context.age_ms(),
            );

            match self.await_landing(&cycle_ctx, &bundle_id).await {
                PollOutcome::Landed(status) => {
                    return Ok(PipelineReport {
                        bundle_id,
                        status,
                        legs: prepared.legs,
                        dropped: prepared.dropped,
                        restarts,
                    });
                }
                PollOutcome::Exhausted { attempts } => {
                    if restarts >= self.settings.max_restarts {
                        cycle_ctx
                            .logger
                            .error(&format!("Bundle {} did not land, no restarts left", bundle_id));
                        return Err(BundleError::StatusTimeout { attempts });
                    }
                    restarts += 1;
                    metrics().pipeline_restarts.inc();
                    cycle_ctx
                        .logger
                        .log_restart(restarts, self.settings.max_restarts);
                }
            }
        }
    }

    /// Prepare one bundle and write the checkpoint without submitting
    pub async fn prepare(&self, ctx: &PipelineContext) -> Result<PreparedBundle, BundleError> {
        self.prepare_cycle(&ctx.child("prepare"), 0).await
    }

    /// Verify and resubmit the first `limit` checkpointed transactions, then poll
    pub async fn submit_checkpoint(
        &self,
        ctx: &PipelineContext,
        limit: usize,
    ) -> Result<(BundleId, PollOutcome), BundleError> {
        let path = self.settings.checkpoint_path.as_ref().ok_or_else(|| {
            BundleError::Configuration("no checkpoint path configured".to_string())
        })?;
        let transactions = read_checkpoint(path, limit).await?;

        let submit_ctx = ctx.child("submit_checkpoint");
        let cycle_id = Uuid::new_v4();
        match verify_transactions(&transactions) {
            Ok(blockhash) => {
                debug!(blockhash = %blockhash, transactions = transactions.len(), "Checkpoint verified");
            }
            Err(e) => {
                self.run_recovery(&submit_ctx, cycle_id, &e).await;
                return Err(e);
            }
        }

        let bundle_id = self
            .submit_encoded(&submit_ctx, cycle_id, &transactions)
            .await?;
        submit_ctx
            .logger
            .log_bundle_submitted(bundle_id.as_str(), transactions.len(), 0);

        let outcome = self.await_landing(&submit_ctx, &bundle_id).await;
        Ok((bundle_id, outcome))
    }

    async fn prepare_cycle(&self, ctx: &PipelineContext, cycle: u32) -> Result<PreparedBundle, BundleError> {
        let timer = Timer::new();
        let blockhash = self.chain.get_latest_blockhash().await?;
        let bundle_ctx = BundleContext::new(blockhash, cycle);
        ctx.logger
            .log_cycle_start(cycle, &blockhash.to_string(), self.wallets.len());

        let (wallets, tip_payer) = self.refresh_balances(ctx).await?;
        let simulator = Simulator::new(self.chain.as_ref());
        let mut assembler = BundleAssembler::new(blockhash);
        let mut legs = Vec::with_capacity(wallets.len() + 1);
        let mut dropped = Vec::new();

        for wallet in &wallets {
            if assembler.remaining_trade_slots() == 0 {
                warn!(wallet = %wallet.pubkey(), "Bundle full, skipping remaining wallets");
                break;
            }

            let leg_ctx = ctx.child("leg");
            match self.trade_leg(&simulator, wallet, &tip_payer, &bundle_ctx).await {
                Ok(leg) => {
                    metrics().legs_prepared.inc();
                    leg_ctx
                        .logger
                        .log_leg_prepared(leg.kind.as_str(), &leg.wallet.to_string(), leg.amount);
                    legs.push(LegSummary::from(&leg));
                    assembler.push_trade(leg)?;
                }
                Err(e) if e.is_leg_local() => {
                    if matches!(e, BundleError::Simulation { .. }) {
                        metrics().simulation_failures.inc();
                    }
                    metrics().legs_dropped.inc();
                    leg_ctx.logger.log_leg_dropped(
                        self.trade_kind(),
                        &wallet.pubkey().to_string(),
                        e.category(),
                        &e.to_string(),
                    );
                    dropped.push(DroppedLeg {
                        wallet: wallet.pubkey().to_string(),
                        category: e.category(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if assembler.trade_count() == 0 {
            ctx.logger.error("Every trade leg was dropped");
            return Err(BundleError::EmptyBundle);
        }

        let tip = self.composer.compose_tip_leg(&tip_payer, &bundle_ctx)?;
        simulator.preflight(&tip).await?;
        metrics().legs_prepared.inc();
        ctx.logger
            .log_leg_prepared(tip.kind.as_str(), &tip.wallet.to_string(), tip.amount);
        legs.push(LegSummary::from(&tip));

        let bundle = assembler.finish(tip)?;
        timer.observe_duration(&metrics().compose_latency);

        if let Some(path) = &self.settings.checkpoint_path {
            write_checkpoint(path, &entries_for_bundle(&bundle)?).await?;
        }

        debug!(
            cycle,
            legs = bundle.len(),
            dropped = dropped.len(),
            blockhash_age_ms = %bundle_ctx.age_ms(),
            "Bundle prepared"
        );

        Ok(PreparedBundle {
            bundle,
            context: bundle_ctx,
            legs,
            dropped,
        })
    }

    fn trade_kind(&self) -> &'static str {
        match self.settings.direction {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }

    async fn trade_leg(
        &self,
        simulator: &Simulator<'_>,
        wallet: &Wallet,
        tip_payer: &Wallet,
        ctx: &BundleContext,
    ) -> Result<LegOutput, BundleError> {
        let leg = match self.settings.direction {
            Direction::Buy => {
                let co_signer = self.settings.cosign_buy_legs.then(|| tip_payer.keypair());
                self.composer
                    .compose_buy_leg(self.chain.as_ref(), self.market.as_ref(), wallet, co_signer, ctx)
                    .await?
            }
            Direction::Sell => {
                self.composer
                    .compose_sell_leg(self.chain.as_ref(), self.market.as_ref(), wallet, ctx)
                    .await?
            }
        };
        simulator.preflight(&leg).await?;
        Ok(leg)
    }

    /// Fresh balances for every trading wallet and the tip payer
    async fn refresh_balances(&self, ctx: &PipelineContext) -> Result<(Vec<Wallet>, Wallet), BundleError> {
        let mut wallets = Vec::with_capacity(self.wallets.len());
        for wallet in &self.wallets {
            let mut wallet = wallet.clone();
            let lamports = self.chain.get_balance(&wallet.pubkey()).await?;
            wallet.set_observed_balance(lamports);
            ctx.logger
                .log_balance(&wallet.pubkey().to_string(), "trader", lamports);
            wallets.push(wallet);
        }

        let mut tip_payer = self.tip_payer.clone();
        let lamports = self.chain.get_balance(&tip_payer.pubkey()).await?;
        tip_payer.set_observed_balance(lamports);
        ctx.logger
            .log_balance(&tip_payer.pubkey().to_string(), "tip_payer", lamports);

        Ok((wallets, tip_payer))
    }

    /// Submit once; any submission failure runs the recovery strategy
    async fn submit_encoded(
        &self,
        ctx: &PipelineContext,
        cycle_id: Uuid,
        transactions: &[String],
    ) -> Result<BundleId, BundleError> {
        match BundleSubmitter::new(self.relay.as_ref()).submit(transactions).await {
            Ok(bundle_id) => {
                metrics().bundles_submitted.inc();
                metrics().last_bundle_size.set(transactions.len() as i64);
                Ok(bundle_id)
            }
            Err(e) => {
                if matches!(e, BundleError::Relay(_)) {
                    metrics().submission_failures.inc();
                }
                self.run_recovery(ctx, cycle_id, &e).await;
                Err(e)
            }
        }
    }

    async fn run_recovery(&self, ctx: &PipelineContext, cycle_id: Uuid, error: &BundleError) {
        metrics().fallback_invocations.inc();
        let reason = RecoveryReason::from_error(cycle_id, error);
        let result = self.recovery.recover(&reason).await;
        ctx.logger
            .log_fallback(self.recovery.name(), reason.category, result.is_ok());
        if let Err(e) = result {
            ctx.logger.error(&format!("Recovery failed: {}", e));
        }
    }

    async fn await_landing(&self, ctx: &PipelineContext, bundle_id: &BundleId) -> PollOutcome {
        let timer = Timer::new();
        let outcome = self.poller.poll(self.relay.as_ref(), bundle_id).await;
        match &outcome {
            PollOutcome::Landed(_) => {
                metrics().bundles_landed.inc();
                timer.observe_duration(&metrics().landing_latency);
                ctx.logger
                    .log_landed(bundle_id.as_str(), (timer.elapsed_secs() * 1000.0) as u64);
            }
            PollOutcome::Exhausted { attempts } => {
                metrics().bundles_exhausted.inc();
                ctx.logger.log_exhausted(bundle_id.as_str(), *attempts);
            }
        }
        info!(bundle_id = %bundle_id, landed = outcome.is_landed(), "Polling finished");
        outcome
    }
}
