//! Cryptographic primitives consumed by the other engines: Keccak-256 (node
//! identity, code hash, block/transaction hash) and secp256k1 ECDSA
//! recovery (transaction sender recovery, the ECRECOVER precompile).

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use primitive_types::{H160, H256, U256};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Keccak-256, the pre-standardization SHA-3 variant used throughout
/// Ethereum (node references, account addresses, block/header hashes,
/// transaction signing hashes).
pub fn keccak256(data: &[u8]) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    H256::from_slice(&hasher.finalize())
}

/// keccak256(rlp("")) — the well-known empty-trie root quoted in §8.
pub fn empty_trie_root() -> H256 {
    keccak256(&[0x80])
}

/// keccak256("") — the code hash of an account with no code.
pub fn empty_code_hash() -> H256 {
    keccak256(&[])
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("recovery id `v` is out of range")]
    InvalidRecoveryId,
    #[error("r or s component is not a valid scalar")]
    InvalidSignature,
    #[error("signature did not recover to a valid public key")]
    RecoveryFailed,
}

/// Recover the 20-byte Ethereum address that produced `(r, s, recovery_id)`
/// over `message_hash`. `recovery_id` is the raw 0/1 parity bit; callers
/// translate the transaction's `v` field (27/28, or the EIP-155-encoded
/// form) down to this before calling.
pub fn ecrecover(
    message_hash: &H256,
    r: &U256,
    s: &U256,
    recovery_id: u8,
) -> Result<H160, SignatureError> {
    let mut sig_bytes = [0u8; 64];
    r.to_big_endian(&mut sig_bytes[..32]);
    s.to_big_endian(&mut sig_bytes[32..]);

    let signature =
        Signature::from_slice(&sig_bytes).map_err(|_| SignatureError::InvalidSignature)?;
    let recid = RecoveryId::from_byte(recovery_id).ok_or(SignatureError::InvalidRecoveryId)?;

    let verifying_key =
        VerifyingKey::recover_from_prehash(message_hash.as_bytes(), &signature, recid)
            .map_err(|_| SignatureError::RecoveryFailed)?;

    Ok(public_key_to_address(&verifying_key))
}

/// An Ethereum address is the last 20 bytes of keccak256 of the 64-byte
/// uncompressed public key (excluding the leading 0x04 tag byte).
fn public_key_to_address(key: &VerifyingKey) -> H160 {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    H160::from_slice(&hash.as_bytes()[12..])
}
