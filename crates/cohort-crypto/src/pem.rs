//! PEM text encoding for key material
//!
//! Study certificates and private keys are stored as plain strings in blob
//! storage. Private and public keys use the standard PKCS#8 / SPKI PEM forms;
//! certificates use the same RFC 7468 armor around their own payload.

use crate::{CryptoError, Result};
use rsa::pkcs8::der::pem::{self as rfc7468, LineEnding};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

/// Label for study certificates
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Label for PKCS#8 private keys
pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// Label for SPKI public keys
pub const PUBLIC_KEY_LABEL: &str = "PUBLIC KEY";

/// Wrap a binary payload in PEM armor
pub fn encode(label: &str, payload: &[u8]) -> Result<String> {
    rfc7468::encode_string(label, LineEnding::LF, payload)
        .map_err(|e| CryptoError::Serialization(format!("PEM encoding failed: {e}")))
}

/// Unwrap PEM armor, requiring the given label
///
/// Surrounding whitespace is ignored. Anything the armor grammar rejects, or
/// a block with a different label, is a [`CryptoError::PemDecode`].
pub fn decode(expected_label: &str, text: &str) -> Result<Vec<u8>> {
    let (label, payload) = rfc7468::decode_vec(text.trim().as_bytes())
        .map_err(|e| CryptoError::PemDecode(e.to_string()))?;
    if label != expected_label {
        return Err(CryptoError::PemDecode(format!(
            "expected {expected_label} block, found {label}"
        )));
    }
    Ok(payload)
}

/// Encode a private key as PKCS#8 PEM
pub fn private_key_to_pem(key: &RsaPrivateKey) -> Result<Zeroizing<String>> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Decode a PKCS#8 PEM private key
pub fn private_key_from_pem(text: &str) -> Result<RsaPrivateKey> {
    // label check first so a certificate in the key slot reads as a PEM error
    decode(PRIVATE_KEY_LABEL, text).map(Zeroizing::new)?;
    RsaPrivateKey::from_pkcs8_pem(text.trim())
        .map_err(|e| CryptoError::PemDecode(format!("invalid PKCS#8 private key: {e}")))
}

/// DER encoding of a public key's SubjectPublicKeyInfo
pub fn public_key_to_der(key: &RsaPublicKey) -> Result<Vec<u8>> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Decode a SubjectPublicKeyInfo DER public key
pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der)
        .map_err(|e| CryptoError::PemDecode(format!("invalid public key: {e}")))
}

/// Encode a public key as SPKI PEM
pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Decode an SPKI PEM public key
pub fn public_key_from_pem(text: &str) -> Result<RsaPublicKey> {
    decode(PUBLIC_KEY_LABEL, text)?;
    RsaPublicKey::from_public_key_pem(text.trim())
        .map_err(|e| CryptoError::PemDecode(format!("invalid public key: {e}")))
}
