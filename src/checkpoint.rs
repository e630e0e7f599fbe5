//! Prepared-transaction checkpoint
//!
//! After assembly and before submission the encoded legs are written to a
//! JSON file:
//!
//! ```json
//! [
//!   { "publicKey": "9xQe...", "rawTransaction": "4vJ9..." },
//!   { "rawTransaction": "2Lk8..." }
//! ]
//! ```
//!
//! The file lets a submission be retried without preparing again.

use crate::compat;
use crate::tx_builder::{decode_transaction, Bundle, BundleError};
use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointEntry {
    /// Fee payer of the transaction, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Base58-encoded signed transaction
    pub raw_transaction: String,
}

impl CheckpointEntry {
    pub fn new(raw_transaction: impl Into<String>) -> Self {
        Self {
            public_key: None,
            raw_transaction: raw_transaction.into(),
        }
    }
}

/// Entries for every leg of a bundle, in bundle order
pub fn entries_for_bundle(bundle: &Bundle) -> Result<Vec<CheckpointEntry>, BundleError> {
    bundle
        .legs()
        .iter()
        .map(|leg| {
            Ok(CheckpointEntry {
                public_key: Some(leg.wallet.to_string()),
                raw_transaction: leg.encode()?,
            })
        })
        .collect()
}

/// Write entries as pretty JSON, creating parent directories
pub async fn write_checkpoint(path: &Path, entries: &[CheckpointEntry]) -> Result<(), BundleError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            BundleError::Checkpoint(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| BundleError::Checkpoint(format!("Failed to serialize checkpoint: {}", e)))?;
    tokio::fs::write(path, json).await.map_err(|e| {
        BundleError::Checkpoint(format!("Failed to write {}: {}", path.display(), e))
    })?;

    info!(path = %path.display(), entries = entries.len(), "Checkpoint written");
    Ok(())
}

/// Read the first `limit` encoded transactions
pub async fn read_checkpoint(path: &Path, limit: usize) -> Result<Vec<String>, BundleError> {
    let data = tokio::fs::read_to_string(path).await.map_err(|e| {
        BundleError::Checkpoint(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let entries: Vec<CheckpointEntry> = serde_json::from_str(&data).map_err(|e| {
        BundleError::Checkpoint(format!("Invalid checkpoint {}: {}", path.display(), e))
    })?;

    let total = entries.len();
    let transactions: Vec<String> = entries
        .into_iter()
        .take(limit)
        .map(|entry| entry.raw_transaction)
        .collect();

    debug!(path = %path.display(), total, read = transactions.len(), "Checkpoint read");
    Ok(transactions)
}

/// Check checkpointed transactions before they are resubmitted
///
/// Every entry must decode, carry a valid signature from each required
/// signer and reference the same blockhash. Returns that blockhash.
pub fn verify_transactions(encoded: &[String]) -> Result<Hash, BundleError> {
    let mut shared: Option<Hash> = None;

    for (index, entry) in encoded.iter().enumerate() {
        let tx = decode_transaction(entry).map_err(|e| match e {
            BundleError::Encoding { .. } => BundleError::Encoding { index },
            other => other,
        })?;

        if !compat::signatures_match_signers(&tx) {
            return Err(BundleError::Signing(format!(
                "checkpoint entry {} has missing or invalid signatures",
                index
            )));
        }

        let blockhash = *compat::get_recent_blockhash(&tx.message);
        match shared {
            None => shared = Some(blockhash),
            Some(expected) if expected != blockhash => {
                return Err(BundleError::BlockhashMismatch {
                    index,
                    expected: expected.to_string(),
                    found: blockhash.to_string(),
                });
            }
            Some(_) => {}
        }
    }

    shared.ok_or(BundleError::EmptyBundle)
}
