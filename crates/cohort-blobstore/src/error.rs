//! Error types for the cohort-blobstore crate

use thiserror::Error;

/// Result type alias using `BlobStoreError`
pub type Result<T> = std::result::Result<T, BlobStoreError>;

/// Errors that can occur during blob storage operations
#[derive(Error, Debug)]
pub enum BlobStoreError {
    /// Object not found
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Object content is not valid UTF-8
    #[error("object {bucket}/{key} is not valid UTF-8")]
    InvalidUtf8 { bucket: String, key: String },

    /// Bucket or key cannot be used as an object name
    #[error("invalid object name: {0}")]
    InvalidKey(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobStoreError {
    /// Whether this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobStoreError::NotFound { .. })
    }
}
