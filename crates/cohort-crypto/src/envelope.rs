//! Hybrid RSA + AEAD envelope encryption
//!
//! Every call to [`EnvelopeEncryptor::encrypt`] draws a fresh content key and
//! nonce, seals the payload with an AEAD cipher, and wraps the content key to
//! the study certificate's RSA key with OAEP/SHA-256. The output is
//! self-describing, in the spirit of CMS EnvelopedData:
//!
//! ```text
//! "CMSE" | version | key transport alg | content alg
//!        | recipient id len | recipient id
//!        | wrapped key len (u16 BE) | wrapped key
//!        | nonce (12) | ciphertext || tag
//! ```
//!
//! Everything before the nonce is authenticated as associated data, so the
//! header cannot be altered without decryption failing.

use crate::{
    authority::{key_identifier, Certificate, KeyMaterial},
    symmetric::{Aead, AeadCipher, ContentKey, Nonce, NONCE_SIZE, TAG_SIZE},
    CryptoError, Result, ENVELOPE_VERSION,
};
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Leading bytes of every envelope
pub const ENVELOPE_MAGIC: &[u8; 4] = b"CMSE";

/// Key transport identifier for RSA-OAEP with SHA-256
pub const KEY_TRANSPORT_RSA_OAEP_SHA256: u8 = 1;

const FIXED_HEADER_LEN: usize = 4 + 1 + 1 + 1 + 1;

/// Envelope configuration
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Cipher used for the payload
    pub cipher: AeadCipher,
}

/// Parsed view over an envelope
struct EnvelopeParts<'a> {
    header: &'a [u8],
    cipher: AeadCipher,
    recipient_id: &'a [u8],
    wrapped_key: &'a [u8],
    nonce: Nonce,
    ciphertext: &'a [u8],
}

impl<'a> EnvelopeParts<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        let truncated = || CryptoError::InvalidCiphertext("envelope truncated".to_string());

        if data.len() < FIXED_HEADER_LEN {
            return Err(truncated());
        }
        if &data[..4] != ENVELOPE_MAGIC {
            return Err(CryptoError::InvalidCiphertext("not an envelope".to_string()));
        }
        if data[4] != ENVELOPE_VERSION {
            return Err(CryptoError::InvalidCiphertext(format!(
                "unsupported envelope version {}",
                data[4]
            )));
        }
        if data[5] != KEY_TRANSPORT_RSA_OAEP_SHA256 {
            return Err(CryptoError::InvalidCiphertext(format!(
                "unknown key transport algorithm {}",
                data[5]
            )));
        }
        let cipher = AeadCipher::from_wire_id(data[6])?;
        let rid_len = data[7] as usize;

        let mut pos = FIXED_HEADER_LEN;
        let recipient_id = data.get(pos..pos + rid_len).ok_or_else(truncated)?;
        pos += rid_len;

        let len_bytes = data.get(pos..pos + 2).ok_or_else(truncated)?;
        let wrapped_len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        pos += 2;
        let wrapped_key = data.get(pos..pos + wrapped_len).ok_or_else(truncated)?;
        pos += wrapped_len;

        let header = &data[..pos];
        let nonce = Nonce::from_bytes(data.get(pos..pos + NONCE_SIZE).ok_or_else(truncated)?)?;
        pos += NONCE_SIZE;

        let ciphertext = &data[pos..];
        if ciphertext.len() < TAG_SIZE {
            return Err(truncated());
        }

        Ok(Self {
            header,
            cipher,
            recipient_id,
            wrapped_key,
            nonce,
            ciphertext,
        })
    }
}

/// Envelope encryptor bound to a study's key material
///
/// Holds the recipient public key (from the certificate), the private key, or
/// both. Immutable after construction and safe to share between tasks.
#[derive(Clone)]
pub struct EnvelopeEncryptor {
    recipient: Option<RsaPublicKey>,
    recipient_id: [u8; 32],
    private_key: Option<RsaPrivateKey>,
    config: EnvelopeConfig,
}

impl EnvelopeEncryptor {
    /// Bind both directions: encrypt to `certificate`, decrypt with `private_key`
    pub fn new(certificate: &Certificate, private_key: RsaPrivateKey) -> Result<Self> {
        let recipient = certificate.public_key()?;
        if RsaPublicKey::from(&private_key) != recipient {
            return Err(CryptoError::InvalidKey(
                "private key does not match certificate".to_string(),
            ));
        }
        Ok(Self {
            recipient_id: key_identifier(&recipient)?,
            recipient: Some(recipient),
            private_key: Some(private_key),
            config: EnvelopeConfig::default(),
        })
    }

    /// Bind both directions from loaded key material
    pub fn from_key_material(material: &KeyMaterial) -> Result<Self> {
        Self::new(material.certificate(), material.private_key().clone())
    }

    /// Encrypt-only view over a certificate
    pub fn encrypt_only(certificate: &Certificate) -> Result<Self> {
        let recipient = certificate.public_key()?;
        Ok(Self {
            recipient_id: key_identifier(&recipient)?,
            recipient: Some(recipient),
            private_key: None,
            config: EnvelopeConfig::default(),
        })
    }

    /// Decrypt-only view over a private key
    pub fn decrypt_only(private_key: RsaPrivateKey) -> Result<Self> {
        let recipient_id = key_identifier(&RsaPublicKey::from(&private_key))?;
        Ok(Self {
            recipient: None,
            recipient_id,
            private_key: Some(private_key),
            config: EnvelopeConfig::default(),
        })
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: EnvelopeConfig) -> Self {
        self.config = config;
        self
    }

    /// SHA-256 of the recipient's SubjectPublicKeyInfo
    pub fn recipient_id(&self) -> &[u8; 32] {
        &self.recipient_id
    }

    /// Whether [`EnvelopeEncryptor::encrypt`] is available
    pub fn can_encrypt(&self) -> bool {
        self.recipient.is_some()
    }

    /// Whether [`EnvelopeEncryptor::decrypt`] is available
    pub fn can_decrypt(&self) -> bool {
        self.private_key.is_some()
    }

    /// Encrypt an arbitrary-length payload
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let recipient = self.recipient.as_ref().ok_or_else(|| {
            CryptoError::InvalidKey("encryptor has no recipient certificate".to_string())
        })?;

        let content_key = ContentKey::generate();
        let wrapped_key = recipient
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), content_key.as_bytes())
            .map_err(|e| CryptoError::Encryption(format!("key wrap failed: {e}")))?;
        let wrapped_len = u16::try_from(wrapped_key.len())
            .map_err(|_| CryptoError::Encryption("wrapped key too long".to_string()))?;

        let mut out = Vec::with_capacity(
            FIXED_HEADER_LEN + 32 + 2 + wrapped_key.len() + NONCE_SIZE + plaintext.len() + TAG_SIZE,
        );
        out.extend_from_slice(ENVELOPE_MAGIC);
        out.push(ENVELOPE_VERSION);
        out.push(KEY_TRANSPORT_RSA_OAEP_SHA256);
        out.push(self.config.cipher.wire_id());
        out.push(self.recipient_id.len() as u8);
        out.extend_from_slice(&self.recipient_id);
        out.extend_from_slice(&wrapped_len.to_be_bytes());
        out.extend_from_slice(&wrapped_key);

        let nonce = Nonce::generate();
        let aead = Aead::new(&content_key, self.config.cipher);
        let ciphertext = aead.encrypt_with_aad(&nonce, plaintext, &out)?;

        out.extend_from_slice(nonce.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt an envelope produced for this encryptor's key
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let private_key = self.private_key.as_ref().ok_or_else(|| {
            CryptoError::InvalidKey("encryptor has no private key".to_string())
        })?;

        let parts = EnvelopeParts::parse(data)?;
        if parts.recipient_id != self.recipient_id.as_slice() {
            return Err(CryptoError::Decryption(format!(
                "envelope is addressed to recipient {}",
                hex::encode(parts.recipient_id)
            )));
        }

        let key_bytes = Zeroizing::new(
            private_key
                .decrypt(Oaep::new::<Sha256>(), parts.wrapped_key)
                .map_err(|_| CryptoError::Decryption("content key unwrap failed".to_string()))?,
        );
        let content_key = ContentKey::from_bytes(&key_bytes)
            .map_err(|_| CryptoError::Decryption("unwrapped content key has wrong length".to_string()))?;

        Aead::new(&content_key, parts.cipher).decrypt_with_aad(
            &parts.nonce,
            parts.ciphertext,
            parts.header,
        )
    }
}

impl std::fmt::Debug for EnvelopeEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeEncryptor")
            .field("recipient_id", &hex::encode(self.recipient_id))
            .field("can_encrypt", &self.can_encrypt())
            .field("can_decrypt", &self.can_decrypt())
            .field("cipher", &self.config.cipher)
            .finish()
    }
}
