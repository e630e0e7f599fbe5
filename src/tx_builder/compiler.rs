//! Instruction compilation into the compact message layout
//!
//! Turns opaque instructions plus an ordered signer list into a deduplicated
//! account key table and index-referenced compiled instructions:
//!
//! 1. Build the table: signers in the order supplied (duplicates skipped),
//!    then every program id and referenced account in first-seen order
//! 2. Resolve every program id and account of every instruction to its table
//!    position, preserving per-instruction account order
//!
//! The function is pure. Instruction execution order is the caller's order.

use crate::tx_builder::errors::BundleError;
use solana_sdk::{
    hash::Hash,
    instruction::{CompiledInstruction, Instruction},
    message::{v0::Message as MessageV0, MessageHeader},
    pubkey::Pubkey,
};
use std::collections::HashMap;

/// Account indices are a single byte on the wire
pub const MAX_ACCOUNT_KEYS: usize = u8::MAX as usize + 1;

/// Result of compiling a list of instructions against a signer list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstructions {
    /// Unique account identifiers, signers first
    pub account_keys: Vec<Pubkey>,
    /// Instructions with program id and accounts replaced by table indices
    pub instructions: Vec<CompiledInstruction>,
    num_signers: usize,
    writable: Vec<bool>,
}

/// A compiled instruction with its indices resolved back through the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub data: Vec<u8>,
}

/// Compile instructions against an ordered signer list
///
/// # Errors
///
/// Returns `BundleError::Compilation` when the table would exceed the
/// one-byte index space, when either header section exceeds 255 entries, or
/// when an instruction demands a signature from an
/// account that is not in `signers`. Both indicate a programming error in the
/// instruction source rather than a runtime condition.
pub fn compile_instructions(
    instructions: &[Instruction],
    signers: &[Pubkey],
) -> Result<CompiledInstructions, BundleError> {
    let mut account_keys: Vec<Pubkey> = Vec::with_capacity(signers.len() + instructions.len() * 4);
    let mut positions: HashMap<Pubkey, usize> = HashMap::new();

    let mut insert = |key: Pubkey, keys: &mut Vec<Pubkey>| {
        if !positions.contains_key(&key) {
            positions.insert(key, keys.len());
            keys.push(key);
        }
    };

    // Pass 1: table construction
    for signer in signers {
        insert(*signer, &mut account_keys);
    }
    let num_signers = account_keys.len();

    for ix in instructions {
        insert(ix.program_id, &mut account_keys);
        for meta in &ix.accounts {
            insert(meta.pubkey, &mut account_keys);
        }
    }

    if account_keys.len() > MAX_ACCOUNT_KEYS {
        return Err(BundleError::compilation(format!(
            "account table has {} entries, at most {} are addressable",
            account_keys.len(),
            MAX_ACCOUNT_KEYS
        )));
    }

    // Header counts are single bytes too
    let unsigned = account_keys.len() - num_signers;
    if u8::try_from(num_signers).is_err() || u8::try_from(unsigned).is_err() {
        return Err(BundleError::compilation(format!(
            "{} signed and {} unsigned entries do not fit the message header",
            num_signers, unsigned
        )));
    }

    let index_of: HashMap<Pubkey, u8> = account_keys
        .iter()
        .enumerate()
        .map(|(idx, key)| (*key, idx as u8))
        .collect();

    let mut writable = vec![false; account_keys.len()];
    if num_signers > 0 {
        // Fee payer
        writable[0] = true;
    }

    // Pass 2: index resolution
    let mut compiled = Vec::with_capacity(instructions.len());
    for (ix_pos, ix) in instructions.iter().enumerate() {
        let program_id_index = index_of[&ix.program_id];

        let mut accounts = Vec::with_capacity(ix.accounts.len());
        for meta in &ix.accounts {
            let idx = index_of[&meta.pubkey];
            if meta.is_signer && (idx as usize) >= num_signers {
                return Err(BundleError::compilation(format!(
                    "instruction {} requires a signature from {} which is not a supplied signer",
                    ix_pos, meta.pubkey
                )));
            }
            if meta.is_writable {
                writable[idx as usize] = true;
            }
            accounts.push(idx);
        }

        compiled.push(CompiledInstruction {
            program_id_index,
            accounts,
            data: ix.data.clone(),
        });
    }

    Ok(CompiledInstructions {
        account_keys,
        instructions: compiled,
        num_signers,
        writable,
    })
}

impl CompiledInstructions {
    /// Number of signer entries at the front of the table
    pub fn num_signers(&self) -> usize {
        self.num_signers
    }

    /// Whether any instruction (or the fee payer role) writes this entry
    pub fn is_writable(&self, index: usize) -> bool {
        self.writable.get(index).copied().unwrap_or(false)
    }

    /// Derive the message header from the table partition
    ///
    /// Read-only counts are the read-only suffixes of the signed and unsigned
    /// sections. A read-only account sitting before a writable one in the same
    /// section is counted as writable, so the table is never reordered.
    pub fn header(&self) -> MessageHeader {
        let (signed, unsigned) = self.writable.split_at(self.num_signers);

        let readonly_suffix =
            |section: &[bool]| section.iter().rev().take_while(|w| !**w).count() as u8;

        MessageHeader {
            num_required_signatures: self.num_signers as u8,
            num_readonly_signed_accounts: readonly_suffix(signed),
            num_readonly_unsigned_accounts: readonly_suffix(unsigned),
        }
    }

    /// Resolve every compiled instruction back through the table
    pub fn decompile(&self) -> Result<Vec<ResolvedInstruction>, BundleError> {
        let lookup = |idx: u8| {
            self.account_keys.get(idx as usize).copied().ok_or_else(|| {
                BundleError::compilation(format!(
                    "index {} outside table of {} entries",
                    idx,
                    self.account_keys.len()
                ))
            })
        };

        self.instructions
            .iter()
            .map(|ix| {
                Ok(ResolvedInstruction {
                    program_id: lookup(ix.program_id_index)?,
                    accounts: ix
                        .accounts
                        .iter()
                        .map(|idx| lookup(*idx))
                        .collect::<Result<Vec<_>, _>>()?,
                    data: ix.data.clone(),
                })
            })
            .collect()
    }

    /// Assemble a v0 message with no address-lookup extensions
    pub fn into_message(self, recent_blockhash: Hash) -> MessageV0 {
        let header = self.header();
        MessageV0 {
            header,
            account_keys: self.account_keys,
            recent_blockhash,
            instructions: self.instructions,
            address_table_lookups: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use solana_sdk::instruction::AccountMeta;

    fn key(seed: u8) -> Pubkey {
        Pubkey::new_from_array([seed; 32])
    }

    #[test]
    fn test_table_order_and_indices() {
        let a = key(1);
        let b = key(2);
        let c = key(3);
        let program_x = key(9);

        let instructions = vec![
            Instruction::new_with_bytes(
                program_x,
                &[7],
                vec![
                    AccountMeta::new(a, true),
                    AccountMeta::new(b, false),
                    AccountMeta::new(c, false),
                ],
            ),
            Instruction::new_with_bytes(program_x, &[8], vec![AccountMeta::new(b, false)]),
            Instruction::new_with_bytes(
                program_x,
                &[9],
                vec![AccountMeta::new_readonly(c, false), AccountMeta::new(a, true)],
            ),
        ];

        let compiled = compile_instructions(&instructions, &[a]).unwrap();

        assert_eq!(compiled.account_keys, vec![a, program_x, b, c]);
        assert_eq!(compiled.instructions[0].program_id_index, 1);
        assert_eq!(compiled.instructions[0].accounts, vec![0, 2, 3]);
        assert_eq!(compiled.instructions[0].data, vec![7]);
        assert_eq!(compiled.instructions[1].accounts, vec![2]);
        assert_eq!(compiled.instructions[2].accounts, vec![3, 0]);
    }

    #[test]
    fn test_duplicate_signers_skipped() {
        let a = key(1);
        let b = key(2);
        let program = key(5);
        let ix = Instruction::new_with_bytes(program, &[], vec![AccountMeta::new(b, true)]);

        let compiled = compile_instructions(&[ix], &[a, b, a]).unwrap();

        assert_eq!(compiled.num_signers(), 2);
        assert_eq!(&compiled.account_keys[..2], &[a, b]);
        assert_eq!(compiled.header().num_required_signatures, 2);
    }

    #[test]
    fn test_header_matches_partition() {
        let payer = key(1);
        let writable = key(2);
        let readonly = key(3);
        let program = key(4);

        let ix = Instruction::new_with_bytes(
            program,
            &[1],
            vec![
                AccountMeta::new(payer, true),
                AccountMeta::new(writable, false),
                AccountMeta::new_readonly(readonly, false),
            ],
        );

        let compiled = compile_instructions(&[ix], &[payer]).unwrap();
        // [payer, program, writable, readonly]: only `readonly` is a read-only suffix
        let header = compiled.header();
        assert_eq!(header.num_required_signatures, 1);
        assert_eq!(header.num_readonly_signed_accounts, 0);
        assert_eq!(header.num_readonly_unsigned_accounts, 1);
        assert!(compiled.is_writable(0));
        assert!(!compiled.is_writable(1));
    }

    #[test]
    fn test_transfer_header() {
        let payer = key(1);
        let dest = key(2);
        let program = Pubkey::default();
        let ix = Instruction::new_with_bytes(
            program,
            &[2, 0, 0, 0],
            vec![AccountMeta::new(payer, true), AccountMeta::new(dest, false)],
        );

        let compiled = compile_instructions(&[ix], &[payer]).unwrap();
        assert_eq!(compiled.account_keys, vec![payer, program, dest]);
        // program id precedes a writable account, so it is not in the read-only suffix
        assert_eq!(compiled.header().num_readonly_unsigned_accounts, 0);
    }

    #[test]
    fn test_instruction_without_accounts() {
        let payer = key(1);
        let program = key(2);
        let ix = Instruction::new_with_bytes(program, &[1, 2], vec![]);

        let compiled = compile_instructions(&[ix], &[payer]).unwrap();
        assert_eq!(compiled.instructions[0].accounts, Vec::<u8>::new());
        assert_eq!(compiled.instructions[0].program_id_index, 1);
    }

    #[test]
    fn test_unknown_signer_rejected() {
        let payer = key(1);
        let stranger = key(2);
        let ix = Instruction::new_with_bytes(key(3), &[], vec![AccountMeta::new(stranger, true)]);

        let result = compile_instructions(&[ix], &[payer]);
        assert!(matches!(result, Err(BundleError::Compilation(_))));
    }

    #[test]
    fn test_table_overflow_rejected() {
        let payer = key(0);
        let accounts = (0..300u16)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[..2].copy_from_slice(&i.to_le_bytes());
                bytes[31] = 1;
                AccountMeta::new(Pubkey::new_from_array(bytes), false)
            })
            .collect();
        let ix = Instruction::new_with_bytes(key(200), &[], accounts);

        let result = compile_instructions(&[ix], &[payer]);
        assert!(matches!(result, Err(BundleError::Compilation(_))));
    }

    fn distinct_keys(count: u16) -> Vec<Pubkey> {
        (0..count)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[..2].copy_from_slice(&i.to_le_bytes());
                bytes[31] = 2;
                Pubkey::new_from_array(bytes)
            })
            .collect()
    }

    #[test]
    fn test_header_count_overflow_rejected() {
        // 256 signers fill the table exactly but not the signature count
        let signers = distinct_keys(256);
        let result = compile_instructions(&[], &signers);
        assert!(matches!(result, Err(BundleError::Compilation(_))));

        // Same for 256 unsigned entries
        let mut keys = distinct_keys(256);
        let program = keys.pop().unwrap();
        let accounts = keys.into_iter().map(|k| AccountMeta::new_readonly(k, false)).collect();
        let ix = Instruction::new_with_bytes(program, &[], accounts);
        let result = compile_instructions(&[ix], &[]);
        assert!(matches!(result, Err(BundleError::Compilation(_))));

        // 255 signers still compile
        let signers = distinct_keys(255);
        let compiled = compile_instructions(&[], &signers).unwrap();
        assert_eq!(compiled.header().num_required_signatures, 255);
    }

    #[test]
    fn test_into_message_carries_blockhash() {
        let payer = key(1);
        let ix = Instruction::new_with_bytes(key(2), &[], vec![AccountMeta::new(payer, true)]);
        let blockhash = Hash::new_from_array([42; 32]);

        let message = compile_instructions(&[ix], &[payer])
            .unwrap()
            .into_message(blockhash);

        assert_eq!(message.recent_blockhash, blockhash);
        assert!(message.address_table_lookups.is_empty());
        assert_eq!(message.header.num_required_signatures, 1);
    }

    /// (program seed, [(account seed, writable)])
    type IxShape = (u8, Vec<(u8, bool)>);

    fn build(shapes: &[IxShape], signers: &[Pubkey]) -> Vec<Instruction> {
        shapes
            .iter()
            .map(|(program, accounts)| {
                let metas = accounts
                    .iter()
                    .map(|(seed, writable)| {
                        let pubkey = key(*seed);
                        let is_signer = signers.contains(&pubkey);
                        if *writable {
                            AccountMeta::new(pubkey, is_signer)
                        } else {
                            AccountMeta::new_readonly(pubkey, is_signer)
                        }
                    })
                    .collect();
                Instruction::new_with_bytes(key(*program), &[*program], metas)
            })
            .collect()
    }

    fn shapes() -> impl Strategy<Value = Vec<IxShape>> {
        prop::collection::vec(
            (0u8..24, prop::collection::vec((0u8..24, any::<bool>()), 0..6)),
            0..6,
        )
    }

    proptest! {
        #[test]
        fn prop_table_entries_unique(shapes in shapes(), signer_seeds in prop::collection::vec(0u8..24, 0..4)) {
            let signers: Vec<Pubkey> = signer_seeds.iter().map(|s| key(*s)).collect();
            let compiled = compile_instructions(&build(&shapes, &signers), &signers).unwrap();

            let mut seen = std::collections::HashSet::new();
            for k in &compiled.account_keys {
                prop_assert!(seen.insert(*k));
            }
        }

        #[test]
        fn prop_index_round_trip(shapes in shapes(), signer_seeds in prop::collection::vec(0u8..24, 0..4)) {
            let signers: Vec<Pubkey> = signer_seeds.iter().map(|s| key(*s)).collect();
            let instructions = build(&shapes, &signers);
            let compiled = compile_instructions(&instructions, &signers).unwrap();

            let resolved = compiled.decompile().unwrap();
            prop_assert_eq!(resolved.len(), instructions.len());
            for (original, back) in instructions.iter().zip(resolved.iter()) {
                prop_assert_eq!(original.program_id, back.program_id);
                let original_accounts: Vec<Pubkey> = original.accounts.iter().map(|m| m.pubkey).collect();
                prop_assert_eq!(&original_accounts, &back.accounts);
                prop_assert_eq!(&original.data, &back.data);
            }
        }

        #[test]
        fn prop_signer_prefix(shapes in shapes(), signer_seeds in prop::collection::vec(0u8..24, 0..4)) {
            let signers: Vec<Pubkey> = signer_seeds.iter().map(|s| key(*s)).collect();
            let compiled = compile_instructions(&build(&shapes, &signers), &signers).unwrap();

            let mut deduped: Vec<Pubkey> = Vec::new();
            for s in &signers {
                if !deduped.contains(s) {
                    deduped.push(*s);
                }
            }
            prop_assert_eq!(&compiled.account_keys[..deduped.len()], deduped.as_slice());
            prop_assert_eq!(compiled.header().num_required_signatures as usize, deduped.len());
        }
    }
}
