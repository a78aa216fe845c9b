//! Raw RSA for very small payloads
//!
//! No hybrid wrapping: the payload itself is padded into a single PKCS#1 v1.5
//! block. Two directions are supported:
//!
//! - public-key encrypt / private-key decrypt (block type 2, random padding)
//! - private-key encrypt / public-key decrypt (block type 1, `0xFF` padding),
//!   the sign-like mode used to prove possession of a study key
//!
//! Payloads are limited to the modulus size minus 11 bytes.

use crate::{CryptoError, Result};
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};

/// Bytes of PKCS#1 v1.5 framing overhead
pub const PKCS1_OVERHEAD: usize = 11;

/// Raw RSA encryptor bound to a public key, a private key, or both
#[derive(Clone, Default)]
pub struct RsaCipher {
    public_key: Option<RsaPublicKey>,
    private_key: Option<RsaPrivateKey>,
}

impl RsaCipher {
    /// Bind both halves of a key pair
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self {
            public_key: Some(RsaPublicKey::from(&private_key)),
            private_key: Some(private_key),
        }
    }

    /// Bind only a public key
    pub fn from_public_key(public_key: RsaPublicKey) -> Self {
        Self {
            public_key: Some(public_key),
            private_key: None,
        }
    }

    /// Largest payload a single block can carry
    pub fn max_payload_len(&self) -> Option<usize> {
        self.public_key
            .as_ref()
            .map(|key| key.size().saturating_sub(PKCS1_OVERHEAD))
    }

    /// Encrypt with the public key
    pub fn encrypt_with_public(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.require_public()?;
        check_len(key, plaintext)?;
        key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Decrypt a block produced by [`RsaCipher::encrypt_with_public`]
    pub fn decrypt_with_private(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let key = self.require_private()?;
        key.decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|_| CryptoError::Decryption("RSA block rejected".to_string()))
    }

    /// Encrypt with the private key (sign-like mode)
    pub fn encrypt_with_private(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.require_private()?;
        check_len(&RsaPublicKey::from(key), plaintext)?;
        // unprefixed PKCS#1 v1.5 signing is exactly a type 1 block, blinded
        key.sign_with_rng(&mut OsRng, Pkcs1v15Sign::new_unprefixed(), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Decrypt a block produced by [`RsaCipher::encrypt_with_private`]
    pub fn decrypt_with_public(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let key = self.require_public()?;
        let k = key.size();
        if ciphertext.len() != k {
            return Err(CryptoError::InvalidCiphertext(format!(
                "RSA block must be {} bytes, got {}",
                k,
                ciphertext.len()
            )));
        }
        let c = BigUint::from_bytes_be(ciphertext);
        if &c >= key.n() {
            return Err(CryptoError::InvalidCiphertext("RSA block out of range".to_string()));
        }
        let block = left_pad(&c.modpow(key.e(), key.n()).to_bytes_be(), k);

        // 0x00 0x01 0xFF.. (at least 8) 0x00 payload
        let malformed = || CryptoError::Decryption("invalid PKCS#1 type 1 padding".to_string());
        if block[0] != 0x00 || block[1] != 0x01 {
            return Err(malformed());
        }
        let separator = block[2..]
            .iter()
            .position(|&b| b != 0xFF)
            .map(|pos| pos + 2)
            .ok_or_else(malformed)?;
        if block[separator] != 0x00 || separator < 10 {
            return Err(malformed());
        }
        Ok(block[separator + 1..].to_vec())
    }

    fn require_public(&self) -> Result<&RsaPublicKey> {
        self.public_key
            .as_ref()
            .ok_or_else(|| CryptoError::InvalidKey("no public key bound".to_string()))
    }

    fn require_private(&self) -> Result<&RsaPrivateKey> {
        self.private_key
            .as_ref()
            .ok_or_else(|| CryptoError::InvalidKey("no private key bound".to_string()))
    }
}

fn check_len(key: &RsaPublicKey, plaintext: &[u8]) -> Result<()> {
    let max = key.size().saturating_sub(PKCS1_OVERHEAD);
    if plaintext.len() > max {
        return Err(CryptoError::Encryption(format!(
            "payload of {} bytes exceeds RSA block capacity of {} bytes",
            plaintext.len(),
            max
        )));
    }
    Ok(())
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;
    use std::sync::OnceLock;

    fn keys() -> &'static (KeyPair, KeyPair) {
        static KEYS: OnceLock<(KeyPair, KeyPair)> = OnceLock::new();
        KEYS.get_or_init(|| (KeyPair::generate().unwrap(), KeyPair::generate().unwrap()))
    }

    #[test]
    fn test_public_to_private() {
        let (kp, _) = keys();
        let sender = RsaCipher::from_public_key(kp.public_key().clone());
        let receiver = RsaCipher::new(kp.private_key().clone());

        let ciphertext = sender.encrypt_with_public(b"study-secret").unwrap();
        assert_eq!(receiver.decrypt_with_private(&ciphertext).unwrap(), b"study-secret");
    }

    #[test]
    fn test_private_to_public() {
        let (kp, _) = keys();
        let owner = RsaCipher::new(kp.private_key().clone());
        let verifier = RsaCipher::from_public_key(kp.public_key().clone());

        let ciphertext = owner.encrypt_with_private(b"proof of possession").unwrap();
        assert_eq!(ciphertext.len(), 256);
        assert_eq!(verifier.decrypt_with_public(&ciphertext).unwrap(), b"proof of possession");
    }

    #[test]
    fn test_private_mode_is_deterministic_and_empty_ok() {
        let (kp, _) = keys();
        let owner = RsaCipher::new(kp.private_key().clone());

        let a = owner.encrypt_with_private(b"").unwrap();
        let b = owner.encrypt_with_private(b"").unwrap();
        assert_eq!(a, b);
        assert!(owner.decrypt_with_public(&a).unwrap().is_empty());
    }

    #[test]
    fn test_private_mode_matches_unprefixed_signature() {
        let (kp, _) = keys();
        let owner = RsaCipher::new(kp.private_key().clone());

        let block = owner.encrypt_with_private(b"study1").unwrap();
        assert!(kp
            .public_key()
            .verify(Pkcs1v15Sign::new_unprefixed(), b"study1", &block)
            .is_ok());
        let max = owner.max_payload_len().unwrap();
        let full = owner.encrypt_with_private(&vec![0xAB; max]).unwrap();
        assert_eq!(owner.decrypt_with_public(&full).unwrap(), vec![0xAB; max]);
    }

    #[test]
    fn test_wrong_public_key_rejects_block() {
        let (kp, other) = keys();
        let owner = RsaCipher::new(kp.private_key().clone());
        let stranger = RsaCipher::from_public_key(other.public_key().clone());

        let ciphertext = owner.encrypt_with_private(b"hello").unwrap();
        assert!(stranger.decrypt_with_public(&ciphertext).is_err());
    }

    #[test]
    fn test_payload_limit() {
        let (kp, _) = keys();
        let cipher = RsaCipher::new(kp.private_key().clone());
        let max = cipher.max_payload_len().unwrap();
        assert_eq!(max, 256 - PKCS1_OVERHEAD);

        assert!(cipher.encrypt_with_public(&vec![7u8; max]).is_ok());
        assert!(cipher.encrypt_with_public(&vec![7u8; max + 1]).is_err());
        assert!(cipher.encrypt_with_private(&vec![7u8; max + 1]).is_err());
    }

    #[test]
    fn test_public_only_cannot_decrypt() {
        let (kp, _) = keys();
        let cipher = RsaCipher::from_public_key(kp.public_key().clone());
        let ciphertext = cipher.encrypt_with_public(b"x").unwrap();
        assert!(matches!(
            cipher.decrypt_with_private(&ciphertext),
            Err(CryptoError::InvalidKey(_))
        ));
    }
}
