//! # Cohort Blobstore
//!
//! Object storage interface for the Cohort upload pipeline.
//!
//! The pipeline only ever reads from blob storage: study certificates and
//! private keys as PEM text, and raw upload ciphertext as bytes. Objects are
//! addressed by `(bucket, key)`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Encryptor Cache / Download Stage      │
//! ├─────────────────────────────────────────┤
//! │            BlobStore Trait              │
//! ├────────────────────┬────────────────────┤
//! │  MemoryBlobStore   │    FsBlobStore     │
//! └────────────────────┴────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use cohort_blobstore::{BlobStore, MemoryBlobStore};
//!
//! let store = MemoryBlobStore::new();
//! store.put_object("cohort-study-certs", "study1.pem", cert_pem);
//! let pem = store.get_object_as_string("cohort-study-certs", "study1.pem").await?;
//! ```

pub mod error;
pub mod fs;
pub mod memory;

pub use error::{BlobStoreError, Result};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use bytes::Bytes;

/// Trait for blob storage backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Retrieve an object's bytes
    async fn get_object_bytes(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Check if an object exists
    async fn has_object(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Retrieve an object as UTF-8 text
    async fn get_object_as_string(&self, bucket: &str, key: &str) -> Result<String> {
        let bytes = self.get_object_bytes(bucket, key).await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BlobStoreError::InvalidUtf8 {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl<S: BlobStore + ?Sized> BlobStore for std::sync::Arc<S> {
    async fn get_object_bytes(&self, bucket: &str, key: &str) -> Result<Bytes> {
        (**self).get_object_bytes(bucket, key).await
    }

    async fn has_object(&self, bucket: &str, key: &str) -> Result<bool> {
        (**self).has_object(bucket, key).await
    }

    async fn get_object_as_string(&self, bucket: &str, key: &str) -> Result<String> {
        (**self).get_object_as_string(bucket, key).await
    }
}
