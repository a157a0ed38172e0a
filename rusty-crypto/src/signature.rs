// rusty-crypto/src/signature.rs

use std::convert::TryFrom;

use ed25519_dalek::{PublicKey, Signature, Verifier};

use crate::error::CryptoError;

pub fn verify_signature(public_key: &PublicKey, message: &[u8], signature: &Signature) -> Result<(), ed25519_dalek::SignatureError> {
    public_key.verify(message, signature)
}

/// Verifies a signature given as raw wire bytes against a raw 32-byte public key.
pub fn verify_raw(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let public_key = PublicKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::try_from(signature)
        .map_err(|_| CryptoError::InvalidSignatureLength(signature.len()))?;
    verify_signature(&public_key, message, &signature).map_err(|_| CryptoError::VerificationFailed)
}
