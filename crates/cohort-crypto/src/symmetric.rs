//! Symmetric encryption using AES-GCM and ChaCha20-Poly1305
//!
//! Two layers live here:
//! - [`Aead`]: raw authenticated encryption with an explicit [`ContentKey`] and
//!   [`Nonce`], used by the envelope encryptor for the bulk payload.
//! - [`SymmetricEncryptor`]: password-based encryption for short values such as
//!   identifiers. The key is derived with Argon2id over a fresh salt for every
//!   message, so encryption is randomized while decryption stays deterministic.

use crate::{CryptoError, Result};
use aes_gcm::{aead::Aead as AeadTrait, aead::Payload, Aes256Gcm, KeyInit};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use chacha20poly1305::ChaCha20Poly1305;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of a symmetric key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of a nonce in bytes (96 bits for AES-GCM/ChaCha20-Poly1305)
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag appended to every ciphertext
pub const TAG_SIZE: usize = 16;

/// Size of the per-message Argon2 salt
pub const SALT_SIZE: usize = 16;

/// Format version of [`SymmetricEncryptor`] output
const PASSWORD_FORMAT_VERSION: u8 = 1;

/// A random content-encryption key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    key: [u8; KEY_SIZE],
}

impl ContentKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "content key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// A nonce for AEAD encryption
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nonce {
    bytes: [u8; NONCE_SIZE],
}

impl Nonce {
    /// Generate a random nonce
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidCiphertext(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; NONCE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    /// Get the nonce bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.bytes
    }
}

/// Supported AEAD ciphers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AeadCipher {
    /// AES-256-GCM
    #[default]
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl AeadCipher {
    /// Wire identifier used in envelope headers
    pub fn wire_id(&self) -> u8 {
        match self {
            Self::Aes256Gcm => 1,
            Self::ChaCha20Poly1305 => 2,
        }
    }

    /// Resolve a wire identifier back to a cipher
    pub fn from_wire_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Self::Aes256Gcm),
            2 => Ok(Self::ChaCha20Poly1305),
            other => Err(CryptoError::InvalidCiphertext(format!(
                "unknown content encryption algorithm {other}"
            ))),
        }
    }
}

/// AEAD encryption/decryption interface
pub struct Aead {
    cipher: AeadCipher,
    key: ContentKey,
}

impl Aead {
    /// Create a new AEAD instance with the given key and cipher
    pub fn new(key: &ContentKey, cipher: AeadCipher) -> Self {
        Self {
            cipher,
            key: key.clone(),
        }
    }

    /// Create with the default cipher (AES-256-GCM)
    pub fn new_default(key: &ContentKey) -> Self {
        Self::new(key, AeadCipher::default())
    }

    /// Encrypt data with the given nonce
    pub fn encrypt(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_with_aad(nonce, plaintext, &[])
    }

    /// Encrypt data with the given nonce and associated data
    pub fn encrypt_with_aad(&self, nonce: &Nonce, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: plaintext, aad };
        let sealed = match self.cipher {
            AeadCipher::Aes256Gcm => Aes256Gcm::new_from_slice(self.key.as_bytes())
                .map_err(|e| CryptoError::Encryption(e.to_string()))?
                .encrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), payload),
            AeadCipher::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(self.key.as_bytes())
                .map_err(|e| CryptoError::Encryption(e.to_string()))?
                .encrypt(chacha20poly1305::Nonce::from_slice(nonce.as_bytes()), payload),
        };
        sealed.map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Decrypt data with the given nonce
    pub fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_with_aad(nonce, ciphertext, &[])
    }

    /// Decrypt data with the given nonce and associated data
    pub fn decrypt_with_aad(&self, nonce: &Nonce, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: ciphertext, aad };
        let opened = match self.cipher {
            AeadCipher::Aes256Gcm => Aes256Gcm::new_from_slice(self.key.as_bytes())
                .map_err(|e| CryptoError::Decryption(e.to_string()))?
                .decrypt(aes_gcm::Nonce::from_slice(nonce.as_bytes()), payload),
            AeadCipher::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(self.key.as_bytes())
                .map_err(|e| CryptoError::Decryption(e.to_string()))?
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce.as_bytes()), payload),
        };
        // aead::Error carries no detail; a tag mismatch and a corrupt body look the same
        opened.map_err(|_| CryptoError::Decryption("authentication tag mismatch".to_string()))
    }
}

/// Argon2id cost parameters for [`SymmetricEncryptor`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Password-based encryptor for short strings and identifiers
///
/// Output layout: `version (1) | salt (16) | nonce (12) | ciphertext || tag`.
/// The cost parameters are a property of the encryptor, not of the message, so
/// an attacker cannot make decryption allocate arbitrary memory.
pub struct SymmetricEncryptor {
    password: Zeroizing<Vec<u8>>,
    params: KdfParams,
    cipher: AeadCipher,
}

impl SymmetricEncryptor {
    /// Create an encryptor with default Argon2id parameters
    pub fn new(password: impl AsRef<[u8]>) -> Result<Self> {
        Self::with_params(password, KdfParams::default())
    }

    /// Create an encryptor with explicit Argon2id parameters
    pub fn with_params(password: impl AsRef<[u8]>, params: KdfParams) -> Result<Self> {
        let password = password.as_ref();
        if password.is_empty() {
            return Err(CryptoError::InvalidKey("password must not be empty".to_string()));
        }
        // Fail early on parameters Argon2 would reject at derivation time
        Params::new(params.memory_kib, params.iterations, params.parallelism, Some(KEY_SIZE))
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Self {
            password: Zeroizing::new(password.to_vec()),
            params,
            cipher: AeadCipher::default(),
        })
    }

    /// Encrypt bytes under a freshly salted key and a random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let key = self.derive_key(&salt)?;
        let nonce = Nonce::generate();
        let ciphertext = Aead::new(&key, self.cipher).encrypt(&nonce, plaintext)?;

        let mut out = Vec::with_capacity(1 + SALT_SIZE + NONCE_SIZE + ciphertext.len());
        out.push(PASSWORD_FORMAT_VERSION);
        out.extend_from_slice(&salt);
        out.extend_from_slice(nonce.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt bytes produced by [`SymmetricEncryptor::encrypt`]
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let header_len = 1 + SALT_SIZE + NONCE_SIZE;
        if data.len() < header_len + TAG_SIZE {
            return Err(CryptoError::InvalidCiphertext(format!(
                "ciphertext too short: {} bytes",
                data.len()
            )));
        }
        if data[0] != PASSWORD_FORMAT_VERSION {
            return Err(CryptoError::InvalidCiphertext(format!(
                "unsupported format version {}",
                data[0]
            )));
        }
        let salt = &data[1..1 + SALT_SIZE];
        let nonce = Nonce::from_bytes(&data[1 + SALT_SIZE..header_len])?;
        let key = self.derive_key(salt)?;
        Aead::new(&key, self.cipher).decrypt(&nonce, &data[header_len..])
    }

    /// Encrypt a string, returning base64 text suitable for storage
    pub fn encrypt_string(&self, plaintext: &str) -> Result<String> {
        let bytes = self.encrypt(plaintext.as_bytes())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Decrypt base64 text produced by [`SymmetricEncryptor::encrypt_string`]
    pub fn decrypt_string(&self, encoded: &str) -> Result<String> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        let plaintext = self.decrypt(&bytes)?;
        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8".to_string()))
    }

    fn derive_key(&self, salt: &[u8]) -> Result<ContentKey> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let mut derived = Zeroizing::new([0u8; KEY_SIZE]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(&self.password, salt, &mut *derived)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        ContentKey::from_bytes(&*derived)
    }
}
