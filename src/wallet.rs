//! Wallet loading and observed balances

use crate::tx_builder::BundleError;
use anyhow::{Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A keypair plus the balance last observed on chain
///
/// The balance is refreshed by the pipeline before every use; it is never
/// persisted.
pub struct Wallet {
    keypair: Arc<Keypair>,
    observed_balance: u64,
}

impl Wallet {
    /// Load a wallet from a keypair file (raw 64 bytes or JSON byte array)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let keypair_bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;

        let keypair = if keypair_bytes.len() == 64 {
            if keypair_bytes.iter().all(|&b| b == 0) {
                anyhow::bail!("Invalid keypair: all-zero key rejected");
            }
            Keypair::try_from(keypair_bytes.as_slice()).context("Invalid keypair bytes")?
        } else {
            let json: Vec<u8> = serde_json::from_slice(&keypair_bytes)
                .context("Failed to parse keypair JSON")?;
            if json.len() != 64 {
                anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", json.len());
            }
            if json.iter().all(|&b| b == 0) {
                anyhow::bail!("Invalid keypair: all-zero key rejected");
            }
            Keypair::try_from(json.as_slice()).context("Invalid keypair from JSON")?
        };

        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
            observed_balance: 0,
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Balance in lamports as of the last refresh
    pub fn observed_balance(&self) -> u64 {
        self.observed_balance
    }

    pub fn set_observed_balance(&mut self, lamports: u64) {
        self.observed_balance = lamports;
    }

    /// Builder-style balance setter, mostly for tests and fakes
    pub fn with_balance(mut self, lamports: u64) -> Self {
        self.observed_balance = lamports;
        self
    }
}

impl Clone for Wallet {
    fn clone(&self) -> Self {
        Self {
            keypair: Arc::clone(&self.keypair),
            observed_balance: self.observed_balance,
        }
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("pubkey", &self.pubkey())
            .field("observed_balance", &self.observed_balance)
            .finish()
    }
}

/// Source of the disposable trading wallets
pub trait WalletSource: Send + Sync {
    /// Load exactly `limit` wallets, failing if fewer are available
    fn load_signers(&self, limit: usize) -> Result<Vec<Wallet>, BundleError>;
}

/// Wallets stored as one keypair file per wallet in a directory
///
/// Files are read in file-name order so the same directory always yields the
/// same wallets in the same order.
#[derive(Debug, Clone)]
pub struct KeyDirectory {
    dir: PathBuf,
}

impl KeyDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl WalletSource for KeyDirectory {
    fn load_signers(&self, limit: usize) -> Result<Vec<Wallet>, BundleError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            BundleError::Configuration(format!(
                "Failed to read keys directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let mut wallets = Vec::with_capacity(limit);
        for path in files.into_iter().take(limit) {
            let wallet = Wallet::from_file(&path).map_err(BundleError::External)?;
            debug!(file = %path.display(), pubkey = %wallet.pubkey(), "Loaded keypair");
            wallets.push(wallet);
        }

        if wallets.len() < limit {
            return Err(BundleError::Configuration(format!(
                "Not enough key files in {}. Found {}, but need {}",
                self.dir.display(),
                wallets.len(),
                limit
            )));
        }

        info!(count = wallets.len(), dir = %self.dir.display(), "Wallets loaded");
        Ok(wallets)
    }
}
