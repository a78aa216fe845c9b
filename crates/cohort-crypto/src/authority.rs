//! Certificate and key authority for study key material
//!
//! Every study gets its own RSA key pair and a certificate binding the public
//! key to the study identity. Certificates are either self-signed roots or
//! issued by an existing CA key pair.
//!
//! # Certificate Format
//!
//! Certificates follow the X.509 model without the ASN.1: the to-be-signed
//! part is a JSON document, and the signature is RSA PKCS#1 v1.5 over SHA-256
//! computed on the exact stored TBS bytes.
//!
//! ```text
//! PEM("CERTIFICATE") of
//! {
//!   "tbs": base64(JSON of TbsCertificate),
//!   "signature_algorithm": "sha256WithRSAEncryption",
//!   "signature": base64(signature over tbs bytes)
//! }
//! ```

use crate::{pem, CryptoError, Result, MAX_RSA_BITS, MIN_RSA_BITS};
use base64::Engine;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rand::{rngs::OsRng, RngCore};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Default RSA modulus size
pub const DEFAULT_RSA_BITS: usize = 2048;

/// Default certificate lifetime (10 years)
pub const DEFAULT_VALIDITY_DAYS: i64 = 3650;

/// Signature algorithm identifier written into certificates
pub const SIGNATURE_ALGORITHM: &str = "sha256WithRSAEncryption";

const CERTIFICATE_VERSION: u8 = 3;

/// An RSA key pair
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generate a new RSA-2048 key pair
    pub fn generate() -> Result<Self> {
        Self::generate_with_bits(DEFAULT_RSA_BITS)
    }

    /// Generate a key pair with an explicit modulus size
    pub fn generate_with_bits(bits: usize) -> Result<Self> {
        if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&bits) {
            return Err(CryptoError::InvalidKeySize {
                bits,
                min: MIN_RSA_BITS,
                max: MAX_RSA_BITS,
            });
        }
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Wrap an existing private key
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self { private, public }
    }

    /// Get the private key
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Get the public key
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").finish_non_exhaustive()
    }
}

/// SHA-256 over the SubjectPublicKeyInfo DER, used as key identifier
pub fn key_identifier(public_key: &RsaPublicKey) -> Result<[u8; 32]> {
    let der = pem::public_key_to_der(public_key)?;
    Ok(Sha256::digest(&der).into())
}

/// Basic constraints extension
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicConstraints {
    /// Whether the subject may issue certificates
    pub ca: bool,
    /// Maximum number of intermediate CAs below this one
    pub path_len: Option<u8>,
}

/// The signed portion of a certificate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TbsCertificate {
    pub version: u8,
    pub serial_number: String,
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// SubjectPublicKeyInfo DER, base64 encoded
    pub subject_public_key: String,
    pub basic_constraints: BasicConstraints,
    /// Hex SHA-256 of the subject public key
    pub subject_key_identifier: String,
    /// Hex SHA-256 of the issuer public key
    pub authority_key_identifier: String,
}

#[derive(Serialize, Deserialize)]
struct CertificateDocument {
    tbs: String,
    signature_algorithm: String,
    signature: String,
}

/// A signed study certificate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    tbs: TbsCertificate,
    tbs_bytes: Vec<u8>,
    signature: Vec<u8>,
}

impl Certificate {
    fn sign(tbs: TbsCertificate, issuer_key: &RsaPrivateKey) -> Result<Self> {
        let tbs_bytes = serde_json::to_vec(&tbs)?;
        let signing_key = SigningKey::<Sha256>::new(issuer_key.clone());
        let signature = signing_key
            .try_sign(&tbs_bytes)
            .map_err(|e| CryptoError::KeyGeneration(format!("certificate signing failed: {e}")))?
            .to_vec();
        Ok(Self {
            tbs,
            tbs_bytes,
            signature,
        })
    }

    /// The signed fields
    pub fn tbs(&self) -> &TbsCertificate {
        &self.tbs
    }

    /// Subject name (the study identity)
    pub fn subject(&self) -> &str {
        &self.tbs.subject
    }

    /// Issuer name
    pub fn issuer(&self) -> &str {
        &self.tbs.issuer
    }

    /// Hex serial number
    pub fn serial_number(&self) -> &str {
        &self.tbs.serial_number
    }

    /// Start of the validity window
    pub fn not_before(&self) -> DateTime<Utc> {
        self.tbs.not_before
    }

    /// End of the validity window
    pub fn not_after(&self) -> DateTime<Utc> {
        self.tbs.not_after
    }

    /// Basic constraints extension
    pub fn basic_constraints(&self) -> BasicConstraints {
        self.tbs.basic_constraints
    }

    /// Subject key identifier (hex)
    pub fn subject_key_identifier(&self) -> &str {
        &self.tbs.subject_key_identifier
    }

    /// Authority key identifier (hex)
    pub fn authority_key_identifier(&self) -> &str {
        &self.tbs.authority_key_identifier
    }

    /// Whether the certificate names itself as issuer
    pub fn is_self_signed(&self) -> bool {
        self.tbs.subject == self.tbs.issuer
            && self.tbs.subject_key_identifier == self.tbs.authority_key_identifier
    }

    /// Decode the subject public key
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        let der = base64::engine::general_purpose::STANDARD.decode(&self.tbs.subject_public_key)?;
        pem::public_key_from_der(&der)
    }

    /// Check the signature against an issuer public key
    pub fn verify(&self, issuer_public_key: &RsaPublicKey) -> Result<()> {
        let signature = Signature::try_from(self.signature.as_slice())
            .map_err(|e| CryptoError::CertificateVerification(e.to_string()))?;
        VerifyingKey::<Sha256>::new(issuer_public_key.clone())
            .verify(&self.tbs_bytes, &signature)
            .map_err(|_| CryptoError::CertificateVerification("signature mismatch".to_string()))
    }

    /// Check that this certificate was issued by `issuer`
    pub fn verify_issued_by(&self, issuer: &Certificate) -> Result<()> {
        if !issuer.basic_constraints().ca {
            return Err(CryptoError::CertificateVerification(format!(
                "issuer {} is not a CA",
                issuer.subject()
            )));
        }
        if self.issuer() != issuer.subject()
            || self.authority_key_identifier() != issuer.subject_key_identifier()
        {
            return Err(CryptoError::CertificateVerification(format!(
                "certificate {} was not issued by {}",
                self.subject(),
                issuer.subject()
            )));
        }
        self.verify(&issuer.public_key()?)
    }

    /// Whether `at` falls inside the validity window
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.tbs.not_before <= at && at <= self.tbs.not_after
    }

    /// Encode as PEM text
    pub fn to_pem(&self) -> Result<String> {
        let engine = base64::engine::general_purpose::STANDARD;
        let document = CertificateDocument {
            tbs: engine.encode(&self.tbs_bytes),
            signature_algorithm: SIGNATURE_ALGORITHM.to_string(),
            signature: engine.encode(&self.signature),
        };
        pem::encode(pem::CERTIFICATE_LABEL, &serde_json::to_vec(&document)?)
    }

    /// Decode PEM text
    pub fn from_pem(text: &str) -> Result<Self> {
        let payload = pem::decode(pem::CERTIFICATE_LABEL, text)?;
        let document: CertificateDocument = serde_json::from_slice(&payload)
            .map_err(|e| CryptoError::PemDecode(format!("invalid certificate body: {e}")))?;
        if document.signature_algorithm != SIGNATURE_ALGORITHM {
            return Err(CryptoError::PemDecode(format!(
                "unsupported signature algorithm {}",
                document.signature_algorithm
            )));
        }
        let engine = base64::engine::general_purpose::STANDARD;
        let tbs_bytes = engine
            .decode(&document.tbs)
            .map_err(|e| CryptoError::PemDecode(format!("invalid certificate body: {e}")))?;
        let signature = engine
            .decode(&document.signature)
            .map_err(|e| CryptoError::PemDecode(format!("invalid certificate signature: {e}")))?;
        let tbs: TbsCertificate = serde_json::from_slice(&tbs_bytes)
            .map_err(|e| CryptoError::PemDecode(format!("invalid certificate fields: {e}")))?;
        Ok(Self {
            tbs,
            tbs_bytes,
            signature,
        })
    }
}

/// Issues study certificates
#[derive(Clone, Debug)]
pub struct CertificateAuthority {
    validity: Duration,
    root_path_len: Option<u8>,
}

impl Default for CertificateAuthority {
    fn default() -> Self {
        Self {
            validity: Duration::days(DEFAULT_VALIDITY_DAYS),
            root_path_len: None,
        }
    }
}

impl CertificateAuthority {
    /// Create an authority with the default validity window
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the validity window for issued certificates
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Limit how many intermediate CAs may sit below self-signed roots
    pub fn with_root_path_len(mut self, path_len: u8) -> Self {
        self.root_path_len = Some(path_len);
        self
    }

    fn validity_end(&self, not_before: DateTime<Utc>) -> Result<DateTime<Utc>> {
        not_before.checked_add_signed(self.validity).ok_or_else(|| {
            CryptoError::CertificateVerification(format!(
                "validity of {} days overflows the certificate date range",
                self.validity.num_days()
            ))
        })
    }

    /// Issue a self-signed root certificate for a key pair
    pub fn new_self_signed(&self, key_pair: &KeyPair, subject: &str) -> Result<Certificate> {
        let key_id = hex::encode(key_identifier(key_pair.public_key())?);
        let not_before = Utc::now().trunc_subsecs(0);
        let tbs = TbsCertificate {
            version: CERTIFICATE_VERSION,
            serial_number: new_serial(),
            subject: subject.to_string(),
            issuer: subject.to_string(),
            not_before,
            not_after: self.validity_end(not_before)?,
            subject_public_key: encode_public_key(key_pair.public_key())?,
            basic_constraints: BasicConstraints {
                ca: true,
                path_len: self.root_path_len,
            },
            subject_key_identifier: key_id.clone(),
            authority_key_identifier: key_id,
        };
        Certificate::sign(tbs, key_pair.private_key())
    }

    /// Issue a leaf certificate for `public_key`, signed by the issuer
    pub fn issue(
        &self,
        public_key: &RsaPublicKey,
        subject: &str,
        issuer: &Certificate,
        issuer_key: &RsaPrivateKey,
    ) -> Result<Certificate> {
        self.issue_with_constraints(
            public_key,
            subject,
            issuer,
            issuer_key,
            BasicConstraints {
                ca: false,
                path_len: None,
            },
        )
    }

    /// Issue an intermediate CA certificate, signed by the issuer
    pub fn issue_intermediate(
        &self,
        public_key: &RsaPublicKey,
        subject: &str,
        issuer: &Certificate,
        issuer_key: &RsaPrivateKey,
    ) -> Result<Certificate> {
        let path_len = match issuer.basic_constraints().path_len {
            Some(0) => {
                return Err(CryptoError::CertificateVerification(format!(
                    "issuer {} may not issue intermediate CAs",
                    issuer.subject()
                )))
            }
            Some(n) => Some(n - 1),
            None => None,
        };
        self.issue_with_constraints(
            public_key,
            subject,
            issuer,
            issuer_key,
            BasicConstraints { ca: true, path_len },
        )
    }

    fn issue_with_constraints(
        &self,
        public_key: &RsaPublicKey,
        subject: &str,
        issuer: &Certificate,
        issuer_key: &RsaPrivateKey,
        basic_constraints: BasicConstraints,
    ) -> Result<Certificate> {
        if !issuer.basic_constraints().ca {
            return Err(CryptoError::CertificateVerification(format!(
                "issuer {} is not a CA",
                issuer.subject()
            )));
        }
        if issuer.public_key()? != RsaPublicKey::from(issuer_key) {
            return Err(CryptoError::CertificateVerification(
                "issuer private key does not match issuer certificate".to_string(),
            ));
        }

        let not_before = Utc::now().trunc_subsecs(0);
        // A certificate never outlives its issuer
        let not_after = self.validity_end(not_before)?.min(issuer.not_after());
        let tbs = TbsCertificate {
            version: CERTIFICATE_VERSION,
            serial_number: new_serial(),
            subject: subject.to_string(),
            issuer: issuer.subject().to_string(),
            not_before,
            not_after,
            subject_public_key: encode_public_key(public_key)?,
            basic_constraints,
            subject_key_identifier: hex::encode(key_identifier(public_key)?),
            authority_key_identifier: issuer.subject_key_identifier().to_string(),
        };
        Certificate::sign(tbs, issuer_key)
    }
}

fn new_serial() -> String {
    let mut serial = [0u8; 16];
    OsRng.fill_bytes(&mut serial);
    hex::encode(serial)
}

fn encode_public_key(public_key: &RsaPublicKey) -> Result<String> {
    Ok(base64::engine::general_purpose::STANDARD.encode(pem::public_key_to_der(public_key)?))
}

/// A study's certificate together with its private key
#[derive(Clone)]
pub struct KeyMaterial {
    certificate: Certificate,
    private_key: RsaPrivateKey,
}

impl KeyMaterial {
    /// Pair a certificate with its private key, checking that they match
    pub fn new(certificate: Certificate, private_key: RsaPrivateKey) -> Result<Self> {
        if certificate.public_key()? != RsaPublicKey::from(&private_key) {
            return Err(CryptoError::InvalidKey(format!(
                "private key does not match certificate for {}",
                certificate.subject()
            )));
        }
        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Generate a fresh key pair and self-signed certificate for a study
    pub fn generate(subject: &str) -> Result<Self> {
        let key_pair = KeyPair::generate()?;
        let certificate = CertificateAuthority::default().new_self_signed(&key_pair, subject)?;
        Ok(Self {
            certificate,
            private_key: key_pair.private,
        })
    }

    /// Parse from certificate and private-key PEM text
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> Result<Self> {
        let certificate = Certificate::from_pem(certificate_pem)?;
        let private_key = pem::private_key_from_pem(private_key_pem)?;
        Self::new(certificate, private_key)
    }

    /// The study certificate
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// The study private key
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Certificate as PEM text
    pub fn certificate_pem(&self) -> Result<String> {
        self.certificate.to_pem()
    }

    /// Private key as PKCS#8 PEM text
    pub fn private_key_pem(&self) -> Result<Zeroizing<String>> {
        pem::private_key_to_pem(&self.private_key)
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("subject", &self.certificate.subject())
            .finish_non_exhaustive()
    }
}
