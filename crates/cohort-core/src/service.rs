//! Upload validation service
//!
//! Ties the pipeline to the upload metadata store: an upload is marked
//! in progress, validated, and its terminal status and messages written back.

use crate::archive::BoundedZipCodec;
use crate::config::PipelineConfig;
use crate::context::UploadValidationContext;
use crate::encryptor_cache::EncryptorCache;
use crate::pipeline::UploadValidator;
use crate::upload::{UploadMetadataStore, UploadStatus, UploadValidationStatus};
use crate::Result;
use cohort_blobstore::BlobStore;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Validates uploads and records the result
pub struct UploadValidationService {
    uploads: Arc<dyn UploadMetadataStore>,
    validator: Arc<UploadValidator>,
    max_concurrent_uploads: usize,
}

impl UploadValidationService {
    /// Create a service around an existing validator
    pub fn new(uploads: Arc<dyn UploadMetadataStore>, validator: Arc<UploadValidator>) -> Self {
        Self {
            uploads,
            validator,
            max_concurrent_uploads: PipelineConfig::default().max_concurrent_uploads,
        }
    }

    /// Build the cache, codec and validator from configuration
    pub fn from_config(
        config: &PipelineConfig,
        blobs: Arc<dyn BlobStore>,
        uploads: Arc<dyn UploadMetadataStore>,
    ) -> Self {
        let encryptors = Arc::new(EncryptorCache::new(
            Arc::clone(&blobs),
            config.cert_bucket.clone(),
            config.private_key_bucket.clone(),
        ));
        let validator = UploadValidator::new(
            blobs,
            config.upload_bucket.clone(),
            encryptors,
            BoundedZipCodec::new(config.archive),
        );
        Self {
            uploads,
            validator: Arc::new(validator),
            max_concurrent_uploads: config.max_concurrent_uploads.max(1),
        }
    }

    /// The validator this service runs
    pub fn validator(&self) -> &Arc<UploadValidator> {
        &self.validator
    }

    /// Validate one upload and persist the outcome
    ///
    /// An upload that is already terminal (for example marked `Duplicate`
    /// before validation) is reported as-is without running the pipeline.
    #[instrument(skip(self))]
    pub async fn validate_upload(&self, upload_id: &str) -> Result<UploadValidationStatus> {
        let mut upload = self.uploads.get_upload(upload_id).await?;
        if upload.status.is_terminal() {
            debug!(status = %upload.status, "upload already terminal");
            return Ok(UploadValidationStatus::from(&upload));
        }

        if upload.status == UploadStatus::Requested {
            upload.transition(UploadStatus::ValidationInProgress)?;
            self.uploads
                .write_validation_result(upload_id, UploadStatus::ValidationInProgress, Vec::new())
                .await?;
        }

        let ctx = self
            .validator
            .validate(UploadValidationContext::from_upload(&upload))
            .await;
        let status = UploadValidationStatus {
            id: upload.upload_id.clone(),
            status: ctx.status,
            message_list: ctx.messages().to_vec(),
        };

        // The caller still learns the outcome when the write fails
        if let Err(e) = self
            .uploads
            .write_validation_result(upload_id, status.status, status.message_list.clone())
            .await
        {
            error!(status = %status.status, error = %e, "failed to write upload validation status");
        }

        info!(status = %status.status, "upload validated");
        Ok(status)
    }

    /// Validate several uploads concurrently
    ///
    /// At most `parallelism` uploads are in flight; results arrive in
    /// completion order, paired with their upload id.
    pub async fn validate_uploads<I>(
        &self,
        upload_ids: I,
        parallelism: usize,
    ) -> Vec<(String, Result<UploadValidationStatus>)>
    where
        I: IntoIterator<Item = String>,
    {
        stream::iter(upload_ids)
            .map(|id| async move {
                let result = self.validate_upload(&id).await;
                (id, result)
            })
            .buffer_unordered(parallelism.max(1))
            .collect()
            .await
    }

    /// Validate several uploads with the configured concurrency
    pub async fn validate_batch<I>(&self, upload_ids: I) -> Vec<(String, Result<UploadValidationStatus>)>
    where
        I: IntoIterator<Item = String>,
    {
        self.validate_uploads(upload_ids, self.max_concurrent_uploads)
            .await
    }
}
