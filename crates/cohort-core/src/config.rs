//! Pipeline configuration

use crate::archive::ArchiveLimits;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming the upload bucket
pub const ENV_UPLOAD_BUCKET: &str = "COHORT_UPLOAD_BUCKET";
/// Environment variable naming the certificate bucket
pub const ENV_CERT_BUCKET: &str = "COHORT_CERT_BUCKET";
/// Environment variable naming the private-key bucket
pub const ENV_PRIVATE_KEY_BUCKET: &str = "COHORT_PRIVATE_KEY_BUCKET";
/// Environment variable for the per-entry decompressed size limit
pub const ENV_MAX_ZIP_ENTRY_SIZE: &str = "COHORT_MAX_ZIP_ENTRY_SIZE";
/// Environment variable for the archive entry count limit
pub const ENV_MAX_ZIP_ENTRIES: &str = "COHORT_MAX_ZIP_ENTRIES";
/// Environment variable for concurrent uploads in a batch
pub const ENV_MAX_CONCURRENT_UPLOADS: &str = "COHORT_MAX_CONCURRENT_UPLOADS";

/// Upload pipeline configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bucket holding raw upload ciphertext, keyed by upload id
    pub upload_bucket: String,
    /// Bucket holding `{study_id}.pem` certificates
    pub cert_bucket: String,
    /// Bucket holding `{study_id}.pem` private keys
    pub private_key_bucket: String,
    /// Limits applied when extracting archives
    pub archive: ArchiveLimits,
    /// Uploads validated at once by a batch
    pub max_concurrent_uploads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_bucket: "cohort-uploads".to_string(),
            cert_bucket: "cohort-study-certs".to_string(),
            private_key_bucket: "cohort-study-keys".to_string(),
            archive: ArchiveLimits::default(),
            max_concurrent_uploads: 8,
        }
    }
}

impl PipelineConfig {
    /// Load from `COHORT_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(bucket) = lookup(ENV_UPLOAD_BUCKET) {
            config.upload_bucket = bucket;
        }
        if let Some(bucket) = lookup(ENV_CERT_BUCKET) {
            config.cert_bucket = bucket;
        }
        if let Some(bucket) = lookup(ENV_PRIVATE_KEY_BUCKET) {
            config.private_key_bucket = bucket;
        }
        if let Some(value) = lookup(ENV_MAX_ZIP_ENTRY_SIZE) {
            config.archive.max_entry_size_bytes = parse_positive(ENV_MAX_ZIP_ENTRY_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_ZIP_ENTRIES) {
            config.archive.max_entry_count = parse_positive(ENV_MAX_ZIP_ENTRIES, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_UPLOADS) {
            config.max_concurrent_uploads = parse_positive(ENV_MAX_CONCURRENT_UPLOADS, &value)?;
        }
        Ok(config)
    }

    /// Set the upload bucket
    pub fn with_upload_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.upload_bucket = bucket.into();
        self
    }

    /// Set the certificate and private-key buckets
    pub fn with_key_buckets(
        mut self,
        cert_bucket: impl Into<String>,
        private_key_bucket: impl Into<String>,
    ) -> Self {
        self.cert_bucket = cert_bucket.into();
        self.private_key_bucket = private_key_bucket.into();
        self
    }

    /// Set the archive limits
    pub fn with_archive_limits(mut self, limits: ArchiveLimits) -> Self {
        self.archive = limits;
        self
    }

    /// Set batch concurrency
    pub fn with_max_concurrent_uploads(mut self, max: usize) -> Self {
        self.max_concurrent_uploads = max.max(1);
        self
    }
}

fn parse_positive<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(CoreError::Config(format!(
            "{name} must be a positive integer, got {value:?}"
        ))),
    }
}
