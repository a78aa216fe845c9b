//! Error types for the cohort-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Requested RSA modulus size is out of range
    #[error("invalid RSA key size: {bits} bits (must be between {min} and {max})")]
    InvalidKeySize { bits: usize, min: usize, max: usize },

    /// Invalid key format or length
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// PEM text could not be decoded into key material
    #[error("PEM decode error: {0}")]
    PemDecode(String),

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Invalid ciphertext format
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Certificate signature or issuer check failed
    #[error("certificate verification failed: {0}")]
    CertificateVerification(String),

    /// Password key derivation failed
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Base64 decode error
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::Serialization(err.to_string())
    }
}
