//! Error types for the cohort-core crate

use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// The resource limit an archive violated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZipOverflow {
    /// More entries than the codec allows
    #[error("archive has more than {max} entries")]
    TooManyEntries { max: usize },

    /// An entry's header claims a size above the limit
    #[error("entry {name} declares {declared} bytes, limit is {max}")]
    DeclaredSizeTooLarge { name: String, declared: u64, max: u64 },

    /// An entry decompressed past the limit while being read
    #[error("entry {name} exceeds {max} bytes when decompressed")]
    EntryTooLarge { name: String, max: u64 },
}

/// Errors that can occur in the upload pipeline
#[derive(Error, Debug)]
pub enum CoreError {
    /// No key material is stored for the study
    #[error("unknown study: {0}")]
    UnknownStudy(String),

    /// Key material exists but cannot be used
    #[error("corrupt key material for study {study_id}: {reason}")]
    KeyMaterial { study_id: String, reason: String },

    /// An upload object is missing from blob storage
    #[error("blob not found: {bucket}/{key}")]
    BlobNotFound { bucket: String, key: String },

    /// Blob store error
    #[error("blob store error: {0}")]
    BlobStore(#[from] cohort_blobstore::BlobStoreError),

    /// Crypto error
    #[error("crypto error: {0}")]
    Crypto(#[from] cohort_crypto::CryptoError),

    /// Archive resource limit exceeded
    #[error("zip overflow: {0}")]
    ZipOverflow(#[from] ZipOverflow),

    /// Two archive entries share a name
    #[error("duplicate archive entry: {0}")]
    DuplicateEntry(String),

    /// Archive is structurally invalid
    #[error("invalid archive: {0}")]
    Archive(String),

    /// Downloaded bytes do not match the recorded checksum
    #[error("content MD5 mismatch: expected {expected}, got {actual}")]
    ContentMismatch { expected: String, actual: String },

    /// An entry could not be parsed
    #[error("failed to parse entry {name}: {reason}")]
    Parse { name: String, reason: String },

    /// The schema validator rejected the archive
    #[error("schema validation failed: {0}")]
    SchemaRejected(String),

    /// Upload record not found
    #[error("upload not found: {0}")]
    UploadNotFound(String),

    /// Upload status change not allowed
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A blocking worker task panicked or was cancelled
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl From<zip::result::ZipError> for CoreError {
    fn from(err: zip::result::ZipError) -> Self {
        CoreError::Archive(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        CoreError::Worker(err.to_string())
    }
}

impl CoreError {
    /// Whether this error blocks a whole study rather than one upload
    pub fn is_key_material(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownStudy(_) | CoreError::KeyMaterial { .. }
        )
    }
}
