//! Per-study encryptor cache
//!
//! Study key material lives in blob storage as `{study_id}.pem` in a
//! certificate bucket and a private-key bucket. The first request for a study
//! loads and parses both; later requests reuse the same [`EnvelopeEncryptor`].
//!
//! Loading is single flight: every study id maps to one [`OnceCell`], so
//! concurrent first requests wait on a single load instead of racing. A failed
//! load leaves the cell empty and the next request retries.

use crate::{CoreError, Result};
use cohort_blobstore::{BlobStore, BlobStoreError};
use cohort_crypto::{EnvelopeEncryptor, KeyMaterial};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

/// Suffix of certificate and private-key object names
pub const PEM_SUFFIX: &str = ".pem";

type Slot = Arc<OnceCell<Arc<EnvelopeEncryptor>>>;

/// Lazily populated map of study id to envelope encryptor
pub struct EncryptorCache {
    store: Arc<dyn BlobStore>,
    cert_bucket: String,
    private_key_bucket: String,
    entries: DashMap<String, Slot>,
}

impl EncryptorCache {
    /// Create a cache reading from the given buckets
    pub fn new(
        store: Arc<dyn BlobStore>,
        cert_bucket: impl Into<String>,
        private_key_bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cert_bucket: cert_bucket.into(),
            private_key_bucket: private_key_bucket.into(),
            entries: DashMap::new(),
        }
    }

    /// Object name holding a study's certificate and private key
    pub fn object_key(study_id: &str) -> String {
        format!("{study_id}{PEM_SUFFIX}")
    }

    /// Get the encryptor for a study, loading it on first use
    pub async fn get(&self, study_id: &str) -> Result<Arc<EnvelopeEncryptor>> {
        if study_id.trim().is_empty() {
            return Err(CoreError::InvalidArgument("study id must not be blank".to_string()));
        }

        // Cached reads never wait on a loader
        let slot = match self.entries.get(study_id) {
            Some(slot) => {
                if let Some(encryptor) = slot.value().get() {
                    return Ok(Arc::clone(encryptor));
                }
                Arc::clone(slot.value())
            }
            None => Arc::clone(
                self.entries
                    .entry(study_id.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .value(),
            ),
        };

        slot.get_or_try_init(|| self.load(study_id))
            .await
            .map(Arc::clone)
    }

    /// Drop a study's cached encryptor, e.g. after key rotation
    pub fn invalidate(&self, study_id: &str) -> bool {
        let removed = self.entries.remove(study_id).is_some();
        if removed {
            info!(study_id, "invalidated cached study encryptor");
        }
        removed
    }

    /// Number of studies with a cache slot
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no study has been requested yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[instrument(skip(self))]
    async fn load(&self, study_id: &str) -> Result<Arc<EnvelopeEncryptor>> {
        let key = Self::object_key(study_id);
        let cert_pem = self.read_pem(study_id, &self.cert_bucket, &key).await?;
        let key_pem = self.read_pem(study_id, &self.private_key_bucket, &key).await?;

        let material = KeyMaterial::from_pem(&cert_pem, &key_pem).map_err(|e| {
            CoreError::KeyMaterial {
                study_id: study_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        let encryptor = EnvelopeEncryptor::from_key_material(&material).map_err(|e| {
            CoreError::KeyMaterial {
                study_id: study_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        debug!(subject = material.certificate().subject(), "loaded study key material");
        Ok(Arc::new(encryptor))
    }

    async fn read_pem(&self, study_id: &str, bucket: &str, key: &str) -> Result<String> {
        match self.store.get_object_as_string(bucket, key).await {
            Ok(text) => Ok(text),
            Err(BlobStoreError::NotFound { .. }) => Err(CoreError::UnknownStudy(study_id.to_string())),
            Err(BlobStoreError::InvalidUtf8 { .. }) => Err(CoreError::KeyMaterial {
                study_id: study_id.to_string(),
                reason: format!("{bucket}/{key} is not PEM text"),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for EncryptorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptorCache")
            .field("cert_bucket", &self.cert_bucket)
            .field("private_key_bucket", &self.private_key_bucket)
            .field("studies", &self.entries.len())
            .finish()
    }
}
