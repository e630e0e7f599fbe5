//! Error types for the bundle pipeline
//!
//! Every failure path of the pipeline maps to exactly one variant so that it
//! can be logged and counted as a distinguishable condition:
//! - Leg-local failures (insufficient funds, simulation) are absorbed by the
//!   pipeline for buy/sell legs and are fatal only for the tip leg
//! - Bundle-level failures (size, encoding, relay) propagate to the caller
//! - A status timeout is not a verdict on the bundle, it only ends polling

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Error type for all bundle pipeline operations
#[derive(Error, Debug)]
pub enum BundleError {
    /// Invalid or missing configuration (e.g. no market identifier)
    ///
    /// Always raised before any network call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Signer balance does not cover the reserve, fee or tip threshold
    #[error("Insufficient funds for {account}: required {required} lamports, available {available}")]
    InsufficientFunds {
        /// The account whose balance was checked
        account: Pubkey,
        /// Lamports the leg needs to keep or spend
        required: u64,
        /// Lamports observed on the account
        available: u64,
    },

    /// Instruction compilation invariant violated
    #[error("Compilation error: {0}")]
    Compilation(String),

    /// A signer failed to produce a signature
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Preflight simulation rejected the transaction
    #[error("Simulation failed: {reason}")]
    Simulation {
        /// Error reported by the chain state oracle
        reason: String,
        /// Program log lines captured during simulation
        logs: Vec<String>,
    },

    /// Failed to fetch a recent blockhash
    #[error("Blockhash error: {0}")]
    Blockhash(String),

    /// Chain state RPC failure
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Instruction source (market maker) failure
    #[error("Market error: {0}")]
    Market(String),

    /// A bundle entry is not valid under the textual encoding
    #[error("Transaction at index {index} is not a valid base58-encoded string")]
    Encoding {
        /// Position of the first invalid entry
        index: usize,
    },

    /// Bundle holds more transactions than the relay accepts
    #[error("Bundles cannot contain more than {max} transactions (got {len})")]
    BundleSize {
        /// Candidate bundle length
        len: usize,
        /// Relay maximum
        max: usize,
    },

    /// Nothing to submit
    #[error("Bundle is empty")]
    EmptyBundle,

    /// Bundle assembly finished without a tip leg
    #[error("Bundle has no tip transaction")]
    MissingTip,

    /// A leg was built against a different blockhash than the bundle
    #[error("Blockhash mismatch at index {index}: expected {expected}, found {found}")]
    BlockhashMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    /// Relay rejected the submission or answered without a bundle id
    #[error("Relay error: {0}")]
    Relay(String),

    /// Polling attempts exhausted without a landing signal
    #[error("Bundle status unavailable after {attempts} attempts")]
    StatusTimeout {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Out-of-band recovery procedure failed
    #[error("Recovery failed: {0}")]
    Recovery(String),

    /// Prepared-transaction checkpoint could not be read or written
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Internal invariant violation or unexpected state
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped error from external crates
    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

impl BundleError {
    /// Whether the failure is confined to a single buy/sell leg
    ///
    /// Leg-local failures drop the leg and let the pipeline continue with
    /// the remaining wallets. The tip leg treats them as fatal, and so does
    /// every RPC call made outside a trade leg (blockhash, balance refresh).
    pub fn is_leg_local(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::Simulation { .. }
                | Self::Market(_)
                | Self::Rpc(_)
        )
    }

    /// Check if retrying the whole operation might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Blockhash(_) => true,
            Self::Rpc(_) => true,
            Self::Relay(_) => true,
            Self::StatusTimeout { .. } => true,
            Self::Simulation { reason, .. } => {
                // Stale blockhash is worth a fresh cycle, program failures are not
                reason.contains("BlockhashNotFound")
            }

            Self::Configuration(_) => false,
            Self::InsufficientFunds { .. } => false,
            Self::Compilation(_) => false,
            Self::Signing(_) => false,
            Self::Market(_) => false,
            Self::Encoding { .. } => false,
            Self::BundleSize { .. } => false,
            Self::EmptyBundle => false,
            Self::MissingTip => false,
            Self::BlockhashMismatch { .. } => false,
            Self::Recovery(_) => false,
            Self::Checkpoint(_) => false,
            Self::Internal(_) => false,
            Self::External(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "config",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::Compilation(_) => "compilation",
            Self::Signing(_) => "signing",
            Self::Simulation { .. } => "simulation",
            Self::Blockhash(_) => "blockhash",
            Self::Rpc(_) => "rpc",
            Self::Market(_) => "market",
            Self::Encoding { .. } => "encoding",
            Self::BundleSize { .. } => "size_limit",
            Self::EmptyBundle => "empty_bundle",
            Self::MissingTip => "missing_tip",
            Self::BlockhashMismatch { .. } => "blockhash_mismatch",
            Self::Relay(_) => "relay",
            Self::StatusTimeout { .. } => "status_timeout",
            Self::Recovery(_) => "recovery",
            Self::Checkpoint(_) => "checkpoint",
            Self::Internal(_) => "internal",
            Self::External(_) => "external",
        }
    }
}

// Convenience constructors for common error scenarios
impl BundleError {
    pub fn insufficient_funds(account: Pubkey, required: u64, available: u64) -> Self {
        Self::InsufficientFunds {
            account,
            required,
            available,
        }
    }

    pub fn simulation_failed(reason: impl Into<String>, logs: Vec<String>) -> Self {
        Self::Simulation {
            reason: reason.into(),
            logs,
        }
    }

    pub fn compilation(reason: impl Into<String>) -> Self {
        Self::Compilation(reason.into())
    }

    pub fn relay(reason: impl Into<String>) -> Self {
        Self::Relay(reason.into())
    }

    pub fn rpc(reason: impl Into<String>) -> Self {
        Self::Rpc(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BundleError::BundleSize { len: 6, max: 5 };
        assert_eq!(
            err.to_string(),
            "Bundles cannot contain more than 5 transactions (got 6)"
        );

        let err = BundleError::Encoding { index: 2 };
        assert_eq!(
            err.to_string(),
            "Transaction at index 2 is not a valid base58-encoded string"
        );
    }

    #[test]
    fn test_leg_local_classification() {
        let account = Pubkey::new_unique();
        assert!(BundleError::insufficient_funds(account, 10, 1).is_leg_local());
        assert!(BundleError::simulation_failed("boom", vec![]).is_leg_local());
        assert!(BundleError::rpc("429 Too Many Requests").is_leg_local());

        assert!(!BundleError::BundleSize { len: 6, max: 5 }.is_leg_local());
        assert!(!BundleError::relay("down").is_leg_local());
        assert!(!BundleError::Configuration("no mint".into()).is_leg_local());
    }

    #[test]
    fn test_error_retryability() {
        assert!(BundleError::StatusTimeout { attempts: 3 }.is_retryable());
        assert!(BundleError::relay("503").is_retryable());
        assert!(BundleError::simulation_failed("BlockhashNotFound", vec![]).is_retryable());

        assert!(!BundleError::simulation_failed("InstructionError", vec![]).is_retryable());
        assert!(!BundleError::Encoding { index: 0 }.is_retryable());
        assert!(!BundleError::Configuration("x".into()).is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(BundleError::EmptyBundle.category(), "empty_bundle");
        assert_eq!(
            BundleError::StatusTimeout { attempts: 1 }.category(),
            "status_timeout"
        );
        assert_eq!(
            BundleError::insufficient_funds(Pubkey::new_unique(), 1, 0).category(),
            "insufficient_funds"
        );
    }
}
