//! Chain state oracle
//!
//! The pipeline reads everything it knows about the ledger through
//! [`ChainState`]: balances, the shared blockhash, account existence and
//! preflight simulation. `RpcChainState` is the production implementation on
//! top of the nonblocking `solana-client` RPC client; tests substitute an
//! in-memory fake.

use crate::tx_builder::BundleError;
use async_trait::async_trait;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcSimulateTransactionConfig};
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey,
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Result of a preflight simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationOutcome {
    Success {
        logs: Vec<String>,
        units_consumed: Option<u64>,
    },
    Failed {
        error: String,
        logs: Vec<String>,
    },
}

impl SimulationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SimulationOutcome::Success { .. })
    }
}

/// Read access to ledger state
#[async_trait]
pub trait ChainState: Send + Sync {
    /// Native balance in lamports
    async fn get_balance(&self, account: &Pubkey) -> Result<u64, BundleError>;

    async fn get_latest_blockhash(&self) -> Result<Hash, BundleError>;

    /// `None` when the account does not exist
    async fn get_account_info(&self, account: &Pubkey) -> Result<Option<Account>, BundleError>;

    /// Token balance of a token account in base units, 0 when it does not exist
    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<u64, BundleError>;

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<SimulationOutcome, BundleError>;
}

/// `ChainState` backed by a JSON-RPC node
pub struct RpcChainState {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl RpcChainState {
    pub fn new(url: impl Into<String>, commitment: CommitmentConfig, timeout: Duration) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(url.into(), timeout, commitment);
        Self {
            client: Arc::new(client),
            commitment,
        }
    }

    pub fn from_client(client: Arc<RpcClient>) -> Self {
        let commitment = client.commitment();
        Self { client, commitment }
    }
}

#[async_trait]
impl ChainState for RpcChainState {
    async fn get_balance(&self, account: &Pubkey) -> Result<u64, BundleError> {
        self.client
            .get_balance_with_commitment(account, self.commitment)
            .await
            .map(|response| response.value)
            .map_err(|e| BundleError::rpc(format!("Failed to fetch balance of {}: {}", account, e)))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, BundleError> {
        let (hash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| BundleError::Blockhash(e.to_string()))?;

        debug!(blockhash = %hash, last_valid_block_height, "Fetched latest blockhash");
        Ok(hash)
    }

    async fn get_account_info(&self, account: &Pubkey) -> Result<Option<Account>, BundleError> {
        self.client
            .get_account_with_commitment(account, self.commitment)
            .await
            .map(|response| response.value)
            .map_err(|e| BundleError::rpc(format!("Failed to fetch account {}: {}", account, e)))
    }

    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<u64, BundleError> {
        if self.get_account_info(token_account).await?.is_none() {
            return Ok(0);
        }

        let balance = self
            .client
            .get_token_account_balance_with_commitment(token_account, self.commitment)
            .await
            .map_err(|e| {
                BundleError::rpc(format!(
                    "Failed to fetch token balance of {}: {}",
                    token_account, e
                ))
            })?
            .value;

        balance.amount.parse::<u64>().map_err(|e| {
            BundleError::rpc(format!(
                "Invalid token amount '{}' for {}: {}",
                balance.amount, token_account, e
            ))
        })
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<SimulationOutcome, BundleError> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: true,
            commitment: Some(self.commitment),
            ..RpcSimulateTransactionConfig::default()
        };

        let result = self
            .client
            .simulate_transaction_with_config(tx, config)
            .await
            .map_err(|e| BundleError::rpc(format!("Simulation request failed: {}", e)))?
            .value;

        let logs = result.logs.unwrap_or_default();
        Ok(match result.err {
            Some(err) => SimulationOutcome::Failed {
                error: format!("{:?}", err),
                logs,
            },
            None => SimulationOutcome::Success {
                logs,
                units_consumed: result.units_consumed,
            },
        })
    }
}
