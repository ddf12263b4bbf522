//! Wallet signature verification
//!
//! Verifies EIP-191 `personal_sign` signatures from Ethereum-style wallets by
//! recovering the secp256k1 public key and comparing the derived address.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Length of an r || s || v signature
pub const SIGNATURE_LENGTH: usize = 65;

/// Errors that can occur while decoding or checking a signature
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("Invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    #[error("Public key recovery failed")]
    RecoveryFailed,
}

/// Signature-checking primitive consumed by the challenge verifier.
///
/// Implementations must be pure: same inputs, same answer, no side effects.
pub trait SignatureVerifier: Send + Sync {
    /// Check `signature` over the exact `message` bytes for `address`
    fn verify(&self, address: &str, message: &str, signature: &[u8]) -> bool;
}

/// EIP-191 / secp256k1 verifier for `0x` addresses
#[derive(Debug, Default, Clone, Copy)]
pub struct EthereumVerifier;

impl SignatureVerifier for EthereumVerifier {
    fn verify(&self, address: &str, message: &str, signature: &[u8]) -> bool {
        match recover_address(message, signature) {
            Ok(recovered) => recovered.eq_ignore_ascii_case(address),
            Err(e) => {
                tracing::debug!(error = %e, "Signature recovery failed");
                false
            }
        }
    }
}

/// Decode a hex signature (with or without `0x`) of the fixed wallet length
pub fn decode_signature(signature_hex: &str) -> Result<Vec<u8>, CryptoError> {
    let trimmed = signature_hex.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let bytes =
        hex::decode(digits).map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;

    if bytes.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::InvalidSignatureFormat(format!(
            "Expected {} bytes, got {}",
            SIGNATURE_LENGTH,
            bytes.len()
        )));
    }

    Ok(bytes)
}

/// Keccak-256 of the EIP-191 prefixed message
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Lowercase `0x` address of a public key
pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point tag
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Recover the signing address of a personal-sign signature
pub fn recover_address(message: &str, signature: &[u8]) -> Result<String, CryptoError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::InvalidSignatureFormat(format!(
            "Expected {} bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        )));
    }

    let mut sig = Signature::from_slice(&signature[..64])
        .map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;

    // Wallets emit v as 27/28; raw recovery ids are 0/1
    let v = signature[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let mut recovery_id =
        RecoveryId::from_byte(recovery_byte).ok_or(CryptoError::InvalidRecoveryId(v))?;

    // High-s signatures are valid on chain; flip to low-s for recovery
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let digest = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;

    Ok(address_of(&key))
}
