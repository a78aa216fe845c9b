//! # Cohort Crypto
//!
//! Cryptographic primitives for the Cohort upload pipeline.
//!
//! This crate provides:
//! - **Key Authority**: RSA key pairs and study certificates (self-signed roots
//!   and issued leaves)
//! - **PEM encoding**: Plain-text key material that can live in blob storage
//! - **Envelope encryption**: CMS-style hybrid RSA-OAEP + AES-256-GCM payloads
//! - **Symmetric encryption**: AEAD primitives and a password-based encryptor
//!   for short identifiers
//! - **Raw RSA**: PKCS#1 v1.5 blocks for very small payloads, in both directions
//!
//! ## Security Model
//!
//! Every study owns its own key pair. Mobile clients encrypt uploads against the
//! study certificate; only the service holding the study's private key can open
//! them. Envelope headers are authenticated, so a ciphertext can be neither
//! re-targeted nor truncated without failing decryption.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cohort_crypto::{CertificateAuthority, EnvelopeEncryptor, KeyPair};
//!
//! let key_pair = KeyPair::generate()?;
//! let cert = CertificateAuthority::default().new_self_signed(&key_pair, "study1")?;
//!
//! let encryptor = EnvelopeEncryptor::new(&cert, key_pair.private_key().clone())?;
//! let ciphertext = encryptor.encrypt(b"archive bytes")?;
//! assert_eq!(encryptor.decrypt(&ciphertext)?, b"archive bytes");
//! ```

pub mod authority;
pub mod envelope;
pub mod error;
pub mod pem;
pub mod rsa_cipher;
pub mod symmetric;

pub use authority::{
    BasicConstraints, Certificate, CertificateAuthority, KeyMaterial, KeyPair,
};
pub use envelope::{EnvelopeConfig, EnvelopeEncryptor};
pub use error::{CryptoError, Result};
pub use rsa_cipher::RsaCipher;
pub use symmetric::{Aead, AeadCipher, ContentKey, KdfParams, Nonce, SymmetricEncryptor};

/// Re-exported so callers can hold keys without depending on `rsa` directly
pub use rsa::{RsaPrivateKey, RsaPublicKey};

/// The version of the envelope wire format
pub const ENVELOPE_VERSION: u8 = 1;

/// Minimum accepted RSA modulus size in bits
pub const MIN_RSA_BITS: usize = 2048;

/// Maximum accepted RSA modulus size in bits
pub const MAX_RSA_BITS: usize = 16384;
