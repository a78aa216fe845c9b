//! Upload records, their lifecycle, and the metadata store they live in

use crate::{CoreError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Upload lifecycle
///
/// ```text
/// Requested ──► ValidationInProgress ──► ValidationFailed
///     │                              ├─► Duplicate
///     │                              └─► Succeeded
///     └─► Duplicate
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    /// Upload requested, bytes may not have arrived
    Requested,
    /// The validation pipeline is running
    ValidationInProgress,
    /// Validation failed; see the message list
    ValidationFailed,
    /// Same content was already uploaded
    Duplicate,
    /// Validation succeeded
    Succeeded,
}

impl UploadStatus {
    /// Wire name, e.g. `VALIDATION_IN_PROGRESS`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::ValidationInProgress => "VALIDATION_IN_PROGRESS",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Duplicate => "DUPLICATE",
            Self::Succeeded => "SUCCEEDED",
        }
    }

    /// Terminal states are final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed | Self::Duplicate | Self::Succeeded
        )
    }

    /// Whether the lifecycle allows moving to `next`
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Requested, ValidationInProgress)
                | (Requested, Duplicate)
                | (ValidationInProgress, ValidationFailed)
                | (ValidationInProgress, Duplicate)
                | (ValidationInProgress, Succeeded)
        )
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload metadata record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    /// Upload id; also the object key of the raw ciphertext
    pub upload_id: String,
    /// Study the upload belongs to
    pub study_id: String,
    /// Pseudonymous participant identifier
    pub health_code: String,
    /// Base64 MD5 of the uploaded bytes, as reported by the client
    pub content_md5: Option<String>,
    /// Size of the uploaded bytes
    pub content_length: u64,
    /// Lifecycle state
    pub status: UploadStatus,
    /// Messages written by the last validation
    pub validation_messages: Vec<String>,
    /// When the upload was requested
    pub requested_on: DateTime<Utc>,
}

impl Upload {
    /// Create a freshly requested upload
    pub fn new(
        upload_id: impl Into<String>,
        study_id: impl Into<String>,
        health_code: impl Into<String>,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            study_id: study_id.into(),
            health_code: health_code.into(),
            content_md5: None,
            content_length: 0,
            status: UploadStatus::Requested,
            validation_messages: Vec::new(),
            requested_on: Utc::now(),
        }
    }

    /// Record the client-reported content checksum and length
    pub fn with_content(mut self, content_md5: impl Into<String>, content_length: u64) -> Self {
        self.content_md5 = Some(content_md5.into());
        self.content_length = content_length;
        self
    }

    /// Move to `next`, enforcing the lifecycle
    pub fn transition(&mut self, next: UploadStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Client-visible validation result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadValidationStatus {
    /// Upload id
    pub id: String,
    /// Coarse status
    pub status: UploadStatus,
    /// Opaque messages
    pub message_list: Vec<String>,
}

impl From<&Upload> for UploadValidationStatus {
    fn from(upload: &Upload) -> Self {
        Self {
            id: upload.upload_id.clone(),
            status: upload.status,
            message_list: upload.validation_messages.clone(),
        }
    }
}

/// Persistence for upload records
#[async_trait]
pub trait UploadMetadataStore: Send + Sync {
    /// Fetch an upload record
    async fn get_upload(&self, upload_id: &str) -> Result<Upload>;

    /// Insert or replace an upload record
    async fn put_upload(&self, upload: Upload) -> Result<()>;

    /// Write a status change and its messages
    async fn write_validation_result(
        &self,
        upload_id: &str,
        status: UploadStatus,
        messages: Vec<String>,
    ) -> Result<()>;
}

/// In-memory upload store
#[derive(Clone, Default)]
pub struct MemoryUploadStore {
    uploads: Arc<DashMap<String, Upload>>,
}

impl MemoryUploadStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored uploads
    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }
}

#[async_trait]
impl UploadMetadataStore for MemoryUploadStore {
    async fn get_upload(&self, upload_id: &str) -> Result<Upload> {
        self.uploads
            .get(upload_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::UploadNotFound(upload_id.to_string()))
    }

    async fn put_upload(&self, upload: Upload) -> Result<()> {
        self.uploads.insert(upload.upload_id.clone(), upload);
        Ok(())
    }

    async fn write_validation_result(
        &self,
        upload_id: &str,
        status: UploadStatus,
        messages: Vec<String>,
    ) -> Result<()> {
        let mut entry = self
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| CoreError::UploadNotFound(upload_id.to_string()))?;
        entry.transition(status)?;
        entry.validation_messages = messages;
        Ok(())
    }
}
