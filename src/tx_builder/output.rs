//! Signed leg output
//!
//! `LegOutput` holds one fully signed transaction of the bundle together with
//! what the pipeline needs to log and assemble it: the leg kind, the wallet
//! that paid for it and the amount it moves.

use crate::tx_builder::errors::BundleError;
use solana_sdk::{hash::Hash, pubkey::Pubkey, transaction::VersionedTransaction};
use std::fmt;

/// Role of a transaction within the bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegKind {
    Buy,
    Sell,
    Tip,
}

impl LegKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegKind::Buy => "buy",
            LegKind::Sell => "sell",
            LegKind::Tip => "tip",
        }
    }

    /// Trade legs may be dropped; the tip leg may not
    pub fn is_trade(&self) -> bool {
        !matches!(self, LegKind::Tip)
    }
}

impl fmt::Display for LegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One signed transaction ready for the bundle
#[derive(Debug, Clone)]
pub struct LegOutput {
    /// Buy, sell or tip
    pub kind: LegKind,

    /// Fee payer and first signer
    pub wallet: Pubkey,

    /// Lamports spent (buy, tip) or token base units sold (sell)
    pub amount: u64,

    /// The signed transaction
    pub tx: VersionedTransaction,

    /// Public keys of the required signers, in signature order
    pub required_signers: Vec<Pubkey>,
}

impl LegOutput {
    /// Wrap a signed transaction, extracting its required signers
    pub fn new(kind: LegKind, wallet: Pubkey, amount: u64, tx: VersionedTransaction) -> Self {
        let required_signers = crate::compat::get_required_signers(&tx.message).to_vec();

        Self {
            kind,
            wallet,
            amount,
            tx,
            required_signers,
        }
    }

    pub fn tx_ref(&self) -> &VersionedTransaction {
        &self.tx
    }

    pub fn into_tx(self) -> VersionedTransaction {
        self.tx
    }

    pub fn required_signers(&self) -> &[Pubkey] {
        &self.required_signers
    }

    /// The recent blockhash this leg was signed against
    pub fn blockhash(&self) -> Hash {
        *crate::compat::get_recent_blockhash(&self.tx.message)
    }

    /// Serialize and base58-encode the transaction for the relay
    pub fn encode(&self) -> Result<String, BundleError> {
        encode_transaction(&self.tx)
    }
}

/// Wire encoding used for bundle entries and the checkpoint file
pub fn encode_transaction(tx: &VersionedTransaction) -> Result<String, BundleError> {
    let bytes = bincode::serialize(tx)
        .map_err(|e| BundleError::internal(format!("Failed to serialize transaction: {}", e)))?;
    Ok(bs58::encode(bytes).into_string())
}

/// Inverse of [`encode_transaction`]
pub fn decode_transaction(encoded: &str) -> Result<VersionedTransaction, BundleError> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|_| BundleError::Encoding { index: 0 })?;
    bincode::deserialize(&bytes)
        .map_err(|e| BundleError::internal(format!("Failed to deserialize transaction: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        message::{v0::Message as MessageV0, VersionedMessage},
        signature::{Keypair, Signer},
        system_instruction,
    };

    fn signed_transfer(payer: &Keypair, blockhash: Hash) -> VersionedTransaction {
        let ix = system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 42);
        let message = MessageV0::try_compile(&payer.pubkey(), &[ix], &[], blockhash).unwrap();
        VersionedTransaction::try_new(VersionedMessage::V0(message), &[payer]).unwrap()
    }

    #[test]
    fn test_leg_output_extracts_signers_and_blockhash() {
        let payer = Keypair::new();
        let blockhash = Hash::new_from_array([9u8; 32]);
        let leg = LegOutput::new(LegKind::Tip, payer.pubkey(), 42, signed_transfer(&payer, blockhash));

        assert_eq!(leg.required_signers(), &[payer.pubkey()]);
        assert_eq!(leg.blockhash(), blockhash);
        assert!(!leg.kind.is_trade());
        assert_eq!(leg.kind.to_string(), "tip");
    }

    #[test]
    fn test_encoded_leg_decodes_to_same_transaction() {
        let payer = Keypair::new();
        let tx = signed_transfer(&payer, Hash::default());
        let leg = LegOutput::new(LegKind::Buy, payer.pubkey(), 42, tx.clone());

        let encoded = leg.encode().unwrap();
        assert!(bs58::decode(&encoded).into_vec().is_ok());
        assert_eq!(decode_transaction(&encoded).unwrap(), tx);
    }

    #[test]
    fn test_decode_rejects_non_base58() {
        assert!(matches!(
            decode_transaction("0OIl"),
            Err(BundleError::Encoding { .. })
        ));
    }
}
