//! Study-scoped encryption and archiving facade

use crate::archive::BoundedZipCodec;
use crate::encryptor_cache::EncryptorCache;
use crate::{CoreError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Encrypt, decrypt, zip and unzip on behalf of a study
#[derive(Clone, Debug)]
pub struct UploadArchiveService {
    encryptors: Arc<EncryptorCache>,
    codec: BoundedZipCodec,
}

impl UploadArchiveService {
    /// Create a service over a shared cache and codec
    pub fn new(encryptors: Arc<EncryptorCache>, codec: BoundedZipCodec) -> Self {
        Self { encryptors, codec }
    }

    /// Encrypt bytes for a study
    pub async fn encrypt(&self, study_id: &str, data: &[u8]) -> Result<Vec<u8>> {
        check_study_id(study_id)?;
        let encryptor = self.encryptors.get(study_id).await?;
        Ok(encryptor.encrypt(data)?)
    }

    /// Decrypt bytes encrypted for a study
    pub async fn decrypt(&self, study_id: &str, data: &[u8]) -> Result<Vec<u8>> {
        check_study_id(study_id)?;
        let encryptor = self.encryptors.get(study_id).await?;
        Ok(encryptor.decrypt(data)?)
    }

    /// Pack named entries into an archive
    pub fn zip(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>> {
        self.codec.zip(entries)
    }

    /// Unpack an untrusted archive within the codec's limits
    pub fn unzip(&self, data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
        self.codec.unzip(data)
    }
}

fn check_study_id(study_id: &str) -> Result<()> {
    if study_id.trim().is_empty() {
        return Err(CoreError::InvalidArgument(
            "study id must be specified".to_string(),
        ));
    }
    Ok(())
}
