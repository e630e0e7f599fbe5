//! Configuration for the bundle pipeline
//!
//! Loaded from a TOML file, then `.env`, then environment overrides. Every
//! section has defaults so a file only needs what differs; the market mint
//! has no default and must come from the file or `TOKEN_MINT`.

use crate::tx_builder::{BundleError, LegPolicy, MAX_BUNDLE_TRANSACTIONS};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chain RPC node
    pub rpc: RpcConfig,

    /// Block-engine relay and status polling
    pub relay: RelayConfig,

    /// Trading wallets and tip payer
    pub wallets: WalletsConfig,

    /// Market identifier and instruction service
    pub market: MarketConfig,

    /// Leg funding thresholds and sizing
    pub policy: PolicyConfig,

    /// Orchestration
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,

    /// processed | confirmed | finalized
    pub commitment: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Full URL of the bundles JSON-RPC endpoint
    pub url: String,

    /// JSON-RPC request id
    pub request_id: u64,

    /// Status requests per submitted bundle
    pub poll_attempts: u32,

    /// Delay between status requests in milliseconds
    pub poll_delay_ms: u64,

    /// Log the in-flight status between attempts
    pub inflight_probe: bool,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletsConfig {
    /// Directory holding one keypair file per trading wallet
    pub keys_directory: String,

    /// Trading wallets per bundle
    pub wallet_count: usize,

    /// Keypair file of the wallet paying the tip
    pub tip_payer_keypair: String,

    /// Have the tip payer co-sign every buy leg
    pub cosign_buy_legs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Token mint of the market, required
    pub token_mint: Option<String>,

    /// Base URL of the instruction service
    pub instruction_service_url: String,

    /// Slippage tolerance in basis points
    pub slippage_bps: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Candidate fractions of the wallet balance for buy legs
    pub buy_fractions: Vec<f64>,

    /// Candidate fractions of the token balance for sell legs
    pub sell_fractions: Vec<f64>,

    /// Smallest buy worth sending
    pub min_trade_lamports: u64,

    /// Lamports a wallet must keep after a buy (token account rent)
    pub buy_reserve_lamports: u64,

    /// Lamports a wallet needs to pay for a sell
    pub sell_fee_reserve_lamports: u64,

    pub tip_lamports: u64,

    /// Lamports the tip payer needs beyond the tip
    pub tip_fee_reserve_lamports: u64,

    /// Micro-lamports per compute unit, 0 disables
    pub compute_unit_price: u64,

    /// Tip destinations, one picked at random per bundle
    pub tip_accounts: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub direction: Direction,

    /// Where prepared transactions are written before submission
    pub checkpoint_path: String,

    /// Full restarts after a status timeout
    pub max_restarts: u32,

    /// Out-of-band command run when the relay refuses a bundle, empty = none
    pub recovery_command: Vec<String>,
}

// Default value functions
fn default_tip_accounts() -> Vec<String> {
    [
        "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
        "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
        "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
        "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
        "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
        "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
        "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
        "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: "confirmed".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "https://mainnet.block-engine.jito.wtf/api/v1/bundles".to_string(),
            request_id: 1,
            poll_attempts: 3,
            poll_delay_ms: 5_000,
            inflight_probe: false,
            timeout_secs: 10,
        }
    }
}

impl Default for WalletsConfig {
    fn default() -> Self {
        Self {
            keys_directory: "./keys".to_string(),
            wallet_count: 4,
            tip_payer_keypair: "./keys/main.json".to_string(),
            cosign_buy_legs: false,
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            token_mint: None,
            instruction_service_url: "http://127.0.0.1:8787".to_string(),
            slippage_bps: 150,
            timeout_secs: 10,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            buy_fractions: vec![0.15, 0.30, 0.45, 0.22, 0.40, 0.68],
            sell_fractions: vec![1.0],
            min_trade_lamports: 10_000,
            buy_reserve_lamports: 2_039_280,
            sell_fee_reserve_lamports: 5_000,
            tip_lamports: 206_000,
            tip_fee_reserve_lamports: 5_000,
            compute_unit_price: 1_000,
            tip_accounts: default_tip_accounts(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Buy,
            checkpoint_path: "./assets/transactions.json".to_string(),
            max_restarts: 1,
            recovery_command: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    ///
    /// A missing file falls back to the defaults.
    pub fn from_file_with_env(path: &Path) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `RPC_URL`, `TOKEN_MINT`, `BLOCK_ENGINE_URL`, `KEYS_DIRECTORY`
    /// and `TIP_PAYER_KEYPAIR`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("RPC_URL") {
            self.rpc.url = url;
        }
        if let Some(mint) = lookup("TOKEN_MINT") {
            self.market.token_mint = Some(mint);
        }
        if let Some(url) = lookup("BLOCK_ENGINE_URL") {
            self.relay.url = url;
        }
        if let Some(dir) = lookup("KEYS_DIRECTORY") {
            self.wallets.keys_directory = dir;
        }
        if let Some(path) = lookup("TIP_PAYER_KEYPAIR") {
            self.wallets.tip_payer_keypair = path;
        }
    }

    /// Check everything that can be checked without the network
    pub fn validate(&self) -> Result<(), BundleError> {
        self.mint()?;
        self.tip_accounts()?;
        self.commitment()?;

        for (name, fractions) in [
            ("buy_fractions", &self.policy.buy_fractions),
            ("sell_fractions", &self.policy.sell_fractions),
        ] {
            if fractions.is_empty() {
                return Err(BundleError::Configuration(format!("policy.{} is empty", name)));
            }
            if let Some(bad) = fractions.iter().find(|f| !(**f > 0.0 && **f <= 1.0)) {
                return Err(BundleError::Configuration(format!(
                    "policy.{} contains {} outside (0, 1]",
                    name, bad
                )));
            }
        }

        if self.relay.poll_attempts == 0 {
            return Err(BundleError::Configuration(
                "relay.poll_attempts must be at least 1".to_string(),
            ));
        }

        let max_wallets = MAX_BUNDLE_TRANSACTIONS - 1;
        if self.wallets.wallet_count == 0 || self.wallets.wallet_count > max_wallets {
            return Err(BundleError::Configuration(format!(
                "wallets.wallet_count must be between 1 and {} (one slot is the tip)",
                max_wallets
            )));
        }

        Ok(())
    }

    /// The market's token mint
    pub fn mint(&self) -> Result<Pubkey, BundleError> {
        let mint = self
            .market
            .token_mint
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| {
                BundleError::Configuration(
                    "market.token_mint (or TOKEN_MINT) is required".to_string(),
                )
            })?;
        Pubkey::from_str(mint.trim())
            .map_err(|e| BundleError::Configuration(format!("Invalid token mint '{}': {}", mint, e)))
    }

    pub fn tip_accounts(&self) -> Result<Vec<Pubkey>, BundleError> {
        if self.policy.tip_accounts.is_empty() {
            return Err(BundleError::Configuration(
                "policy.tip_accounts is empty".to_string(),
            ));
        }
        self.policy
            .tip_accounts
            .iter()
            .map(|account| {
                Pubkey::from_str(account).map_err(|e| {
                    BundleError::Configuration(format!("Invalid tip account '{}': {}", account, e))
                })
            })
            .collect()
    }

    pub fn commitment(&self) -> Result<CommitmentConfig, BundleError> {
        match self.rpc.commitment.as_str() {
            "processed" => Ok(CommitmentConfig::processed()),
            "confirmed" => Ok(CommitmentConfig::confirmed()),
            "finalized" => Ok(CommitmentConfig::finalized()),
            other => Err(BundleError::Configuration(format!(
                "Unknown commitment '{}'",
                other
            ))),
        }
    }

    pub fn leg_policy(&self) -> Result<LegPolicy, BundleError> {
        Ok(LegPolicy {
            min_trade_lamports: self.policy.min_trade_lamports,
            buy_reserve_lamports: self.policy.buy_reserve_lamports,
            sell_fee_reserve_lamports: self.policy.sell_fee_reserve_lamports,
            tip_lamports: self.policy.tip_lamports,
            tip_fee_reserve_lamports: self.policy.tip_fee_reserve_lamports,
            compute_unit_price: self.policy.compute_unit_price,
            slippage_bps: self.market.slippage_bps,
            tip_accounts: self.tip_accounts()?,
        })
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.relay.poll_delay_ms)
    }
}
