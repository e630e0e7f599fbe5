//! Uniform accessors over `VersionedMessage`
//!
//! Legs are always built as v0 messages, but transactions read back from a
//! checkpoint or produced by an out-of-band procedure may be legacy. Every
//! check the bundle layer performs (shared blockhash, signature order) goes
//! through these helpers so it works for both.

use solana_sdk::{
    hash::Hash,
    message::{MessageHeader, VersionedMessage},
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};

/// Get the message header from a `VersionedMessage`.
#[inline]
#[must_use]
pub fn get_message_header(message: &VersionedMessage) -> &MessageHeader {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.header,
        VersionedMessage::V0(v0_msg) => &v0_msg.header,
    }
}

/// Get the static account keys from a `VersionedMessage`.
///
/// For v0 messages this excludes addresses loaded through lookup tables.
#[inline]
#[must_use]
pub fn get_static_account_keys(message: &VersionedMessage) -> &[Pubkey] {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.account_keys,
        VersionedMessage::V0(v0_msg) => &v0_msg.account_keys,
    }
}

/// Get the recent blockhash the message was built against
#[inline]
#[must_use]
pub fn get_recent_blockhash(message: &VersionedMessage) -> &Hash {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.recent_blockhash,
        VersionedMessage::V0(v0_msg) => &v0_msg.recent_blockhash,
    }
}

/// Get the required signers from a `VersionedMessage`.
///
/// Required signers are always the first `header.num_required_signatures`
/// static account keys.
#[inline]
#[must_use]
pub fn get_required_signers(message: &VersionedMessage) -> &[Pubkey] {
    let header = get_message_header(message);
    let account_keys = get_static_account_keys(message);
    let num_signers = header.num_required_signatures as usize;

    &account_keys[..num_signers.min(account_keys.len())]
}

/// Check that signature `i` was produced by required signer `i` over the
/// serialized message
///
/// Returns false when the signature count differs from the header.
#[must_use]
pub fn signatures_match_signers(tx: &VersionedTransaction) -> bool {
    let signers = get_required_signers(&tx.message);
    if signers.len() != tx.signatures.len() {
        return false;
    }

    let message_bytes = tx.message.serialize();
    tx.signatures
        .iter()
        .zip(signers.iter())
        .all(|(signature, signer)| signature.verify(signer.as_ref(), &message_bytes))
}
