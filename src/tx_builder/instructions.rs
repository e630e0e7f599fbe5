//! Leg instruction planning and ordering validation
//!
//! Every trade leg is built with the same instruction order:
//! 1. create_associated_token_account (only when the wallet has none yet)
//! 2. Compute budget price instruction (optional)
//! 3. Market-maker instructions, in the order the SDK returned them
//!
//! The tip leg is a single system transfer to one of the relay's tip
//! destinations, picked uniformly at random so no destination is favoured.

use crate::tx_builder::errors::BundleError;
use solana_sdk::{
    compute_budget::{self, ComputeBudgetInstruction},
    instruction::Instruction,
    pubkey::Pubkey,
    system_instruction,
};

/// Ordered instructions for one trade leg
#[derive(Debug, Clone)]
pub struct InstructionPlan {
    /// The ordered list of instructions for the transaction
    pub instructions: Vec<Instruction>,

    /// Whether the plan starts with an associated token account creation
    pub creates_token_account: bool,
}

impl InstructionPlan {
    pub fn new(instructions: Vec<Instruction>, creates_token_account: bool) -> Self {
        Self {
            instructions,
            creates_token_account,
        }
    }
}

/// Plan a trade leg's instructions in execution order
///
/// # Arguments
///
/// * `create_ata` - Token account creation, when the account does not exist yet
/// * `cu_price` - Priority fee in micro-lamports (0 = skip this instruction)
/// * `market_ixs` - Instructions supplied by the market maker
///
/// # Errors
///
/// Returns `BundleError::Market` if the market maker produced nothing to execute
pub fn plan_leg_instructions(
    create_ata: Option<Instruction>,
    cu_price: u64,
    market_ixs: Vec<Instruction>,
) -> Result<InstructionPlan, BundleError> {
    if market_ixs.is_empty() {
        return Err(BundleError::Market(
            "market maker returned no instructions".to_string(),
        ));
    }

    let mut instructions = Vec::with_capacity(market_ixs.len() + 2);
    let creates_token_account = create_ata.is_some();

    if let Some(ix) = create_ata {
        instructions.push(ix);
    }

    if cu_price > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(cu_price));
    }

    instructions.extend(market_ixs);

    Ok(InstructionPlan::new(instructions, creates_token_account))
}

/// Build the tip payment instruction
pub fn tip_instruction(payer: &Pubkey, tip_account: &Pubkey, lamports: u64) -> Instruction {
    system_instruction::transfer(payer, tip_account, lamports)
}

/// Pick a tip destination uniformly at random
pub fn select_tip_account(candidates: &[Pubkey], rng: &mut fastrand::Rng) -> Option<Pubkey> {
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.usize(..candidates.len())])
}

#[cfg(debug_assertions)]
fn is_ata_create(ix: &Instruction) -> bool {
    ix.program_id == spl_associated_token_account::id()
}

#[cfg(debug_assertions)]
fn is_compute_budget(ix: &Instruction) -> bool {
    ix.program_id == compute_budget::id()
}

/// Validate leg instruction ordering (debug/test only)
///
/// Expected order:
/// 1. At most one associated token account creation, and only at position 0
/// 2. Compute budget instructions, before any market instruction
/// 3. Market instructions
#[cfg(debug_assertions)]
pub fn sanity_check_ix_order(
    instructions: &[Instruction],
    creates_token_account: bool,
) -> Result<(), BundleError> {
    if instructions.is_empty() {
        return Err(BundleError::internal("Instruction list is empty"));
    }

    let first_is_ata = is_ata_create(&instructions[0]);
    if creates_token_account && !first_is_ata {
        return Err(BundleError::internal(format!(
            "Token account creation must come first, got program_id: {}",
            instructions[0].program_id
        )));
    }
    if !creates_token_account && first_is_ata {
        return Err(BundleError::internal(
            "Plan does not expect a token account creation but starts with one",
        ));
    }

    let mut seen_market = false;
    let start = usize::from(first_is_ata);
    for (idx, ix) in instructions.iter().enumerate().skip(start) {
        if is_ata_create(ix) {
            return Err(BundleError::internal(format!(
                "Token account creation found at position {}. Only position 0 allowed",
                idx
            )));
        }
        if is_compute_budget(ix) {
            if seen_market {
                return Err(BundleError::internal(format!(
                    "Compute budget instruction at position {} follows a market instruction",
                    idx
                )));
            }
        } else {
            seen_market = true;
        }
    }

    Ok(())
}

#[cfg(not(debug_assertions))]
#[inline]
pub fn sanity_check_ix_order(
    _instructions: &[Instruction],
    _creates_token_account: bool,
) -> Result<(), BundleError> {
    Ok(())
}
