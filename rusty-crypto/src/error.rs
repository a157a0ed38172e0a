use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid secret key bytes")]
    InvalidSecretKey,

    #[error("Invalid public key bytes")]
    InvalidPublicKey,

    #[error("Invalid signature length: {0} bytes")]
    InvalidSignatureLength(usize),

    #[error("Signature verification failed")]
    VerificationFailed,
}
