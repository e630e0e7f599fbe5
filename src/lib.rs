//! Atomic multi-wallet bundle pipeline
//!
//! Composes independently-signed trade legs for several wallets, appends a
//! tip leg, submits the ordered set to a block-engine relay and polls for the
//! landing status.

pub mod chain;
pub mod checkpoint;
pub mod compat;
pub mod config;
pub mod market;
pub mod metrics;
pub mod pipeline;
pub mod structured_logging;
pub mod test_utils;
pub mod tx_builder;
pub mod wallet;

// Re-export commonly used types
pub use pipeline::{BundlePipeline, PipelineReport, PipelineSettings};
pub use solana_sdk::{message::VersionedMessage, pubkey::Pubkey, signature::Signature};
pub use tx_builder::BundleError;
