//! Filesystem blob store
//!
//! Buckets are directories under a root and keys are relative paths inside
//! them. Names that could escape the root are rejected.

use crate::{BlobStore, BlobStoreError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

/// A blob store backed by a local directory
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an object, creating the bucket directory as needed
    pub async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        if !is_single_component(bucket) {
            return Err(BlobStoreError::InvalidKey(format!("bucket {bucket:?}")));
        }
        let key_path = Path::new(key);
        let key_ok = !key.is_empty()
            && !key.contains('\0')
            && key_path
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !key_ok {
            return Err(BlobStoreError::InvalidKey(format!("key {key:?}")));
        }
        Ok(self.root.join(bucket).join(key_path))
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    !name.contains('\0')
        && matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip(self))]
    async fn get_object_bytes(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(size = data.len(), "read object");
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn has_object(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
