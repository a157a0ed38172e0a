//! Keypair generation and management for Rusty Coin.

use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};
use rand::rngs::OsRng;

use crate::error::CryptoError;

/// Represents a cryptographic key pair (public and secret key).
pub struct RustyKeyPair {
    keypair: Keypair,
}

impl RustyKeyPair {
    /// Generates a new random key pair.
    pub fn generate() -> Self {
        let mut csprng = OsRng {};
        let keypair = Keypair::generate(&mut csprng);
        RustyKeyPair { keypair }
    }

    /// Rebuilds a key pair from a 32-byte secret.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_bytes(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
        let public = PublicKey::from(&secret);
        Ok(RustyKeyPair { keypair: Keypair { secret, public } })
    }

    /// Returns the public key of this key pair.
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.keypair.public.to_bytes()
    }

    /// Signs the given message with the secret key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }

    /// Signs and returns the signature in its 64-byte wire form.
    pub fn sign_to_vec(&self, message: &[u8]) -> Vec<u8> {
        self.sign(message).to_bytes().to_vec()
    }

    /// Verifies the given signature against the message and public key.
    pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> Result<(), ed25519_dalek::SignatureError> {
        public_key.verify(message, signature)
    }
}
