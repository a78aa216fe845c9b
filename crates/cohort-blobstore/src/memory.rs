//! In-memory blob store for testing and local runs

use crate::{BlobStore, BlobStoreError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

/// An in-memory blob store
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<DashMap<(String, String), Bytes>>,
}

impl MemoryBlobStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
        }
    }

    /// Store an object, replacing any previous content
    pub fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.objects
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    /// Remove an object
    pub fn delete_object(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .remove(&(bucket.to_string(), key.to_string()))
            .is_some()
    }

    /// Get the number of objects stored
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// List the keys in a bucket
    pub fn list_keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get_object_bytes(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BlobStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn has_object(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .contains_key(&(bucket.to_string(), key.to_string())))
    }
}
