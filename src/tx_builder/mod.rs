//! Bundle transaction building supercomponent
//!
//! Everything between "here are some instructions" and "the relay has (or
//! has not) landed the bundle":
//!
//! ## Architecture
//!
//! - **compiler**: instructions + signers into a deduplicated account key
//!   table and index-referenced instructions
//! - **instructions**: per-leg instruction planning and order checks
//! - **builder**: signing and the buy/sell/tip leg policies
//! - **context**: the per-cycle shared blockhash
//! - **output**: signed legs and their wire encoding
//! - **simulate**: per-leg preflight simulation
//! - **bundle**: bundle assembly, relay client and submission
//! - **poller**: bounded landing-status polling
//! - **recovery**: out-of-band fallback after a refused submission
//! - **errors**: the error taxonomy shared by all of the above
//!
//! ## Ordering guarantees
//!
//! - All legs of a bundle reference the blockhash of one `BundleContext`
//! - The tip leg is always the last transaction of a bundle
//! - Instruction execution order is the caller's order, never reordered by
//!   compilation

pub mod errors;
pub use errors::BundleError;

pub mod builder;
pub mod bundle;
pub mod compiler;
pub mod context;
pub mod instructions;
pub mod output;
pub mod poller;
pub mod recovery;
pub mod simulate;

pub use builder::{
    compose_transaction, FixedSelector, FractionSelector, LegPolicy, TradeSizer,
    TransactionComposer, UniformSelector,
};
pub use bundle::{
    validate_encoded, Bundle, BundleAssembler, BundleId, BundleRelay, BundleStatus,
    BundleSubmitter, JitoRelayClient, MAX_BUNDLE_TRANSACTIONS,
};
pub use compiler::{compile_instructions, CompiledInstructions, ResolvedInstruction};
pub use context::BundleContext;
pub use instructions::{plan_leg_instructions, sanity_check_ix_order, InstructionPlan};
pub use output::{decode_transaction, encode_transaction, LegKind, LegOutput};
pub use poller::{PollOutcome, PollState, Sleeper, StatusPoller, TokioSleeper};
pub use recovery::{CommandRecovery, NoopRecovery, RecoveryReason, RecoveryStrategy};
pub use simulate::Simulator;

pub type Result<T> = std::result::Result<T, BundleError>;
