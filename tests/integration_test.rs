//! Integration tests for the upload pipeline
//!
//! These tests drive uploads end to end: participant-side zip and encrypt,
//! storage, then validation through the service.

use async_trait::async_trait;
use base64::Engine;
use cohort_blobstore::{BlobStore, FsBlobStore, MemoryBlobStore};
use cohort_core::{
    BoundedZipCodec, CoreError, EncryptorCache, MemoryUploadStore, PipelineConfig, Upload,
    UploadArchiveService, UploadMetadataStore, UploadStatus, UploadValidationService,
};
use cohort_crypto::{EnvelopeEncryptor, KeyMaterial};
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

fn study_material(study: &str) -> &'static KeyMaterial {
    static STUDY1: OnceLock<KeyMaterial> = OnceLock::new();
    static STUDY2: OnceLock<KeyMaterial> = OnceLock::new();
    let cell = if study == "study1" { &STUDY1 } else { &STUDY2 };
    cell.get_or_init(|| KeyMaterial::generate(study).unwrap())
}

fn provision(store: &MemoryBlobStore, config: &PipelineConfig, study: &str) {
    let material = study_material(study);
    let key = EncryptorCache::object_key(study);
    store.put_object(&config.cert_bucket, &key, material.certificate_pem().unwrap());
    store.put_object(
        &config.private_key_bucket,
        &key,
        material.private_key_pem().unwrap().to_string(),
    );
}

fn survey_files() -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    files.insert("info.json".to_string(), br#"{"item":"survey"}"#.to_vec());
    files.insert("answers.json".to_string(), br#"{"q1":"yes","q2":3}"#.to_vec());
    files
}

fn encrypted_upload(study: &str) -> Vec<u8> {
    let archive = BoundedZipCodec::default().zip(&survey_files()).unwrap();
    EnvelopeEncryptor::from_key_material(study_material(study))
        .unwrap()
        .encrypt(&archive)
        .unwrap()
}

fn content_md5(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(Md5::digest(data))
}

/// Test a full roundtrip through the service
#[tokio::test]
async fn test_encrypted_upload_succeeds() {
    let config = PipelineConfig::default();
    let blobs = MemoryBlobStore::new();
    provision(&blobs, &config, "study1");

    let body = encrypted_upload("study1");
    blobs.put_object(&config.upload_bucket, "upload-1", body.clone());
    let uploads = MemoryUploadStore::new();
    uploads
        .put_upload(
            Upload::new("upload-1", "study1", "hc-1").with_content(content_md5(&body), body.len() as u64),
        )
        .await
        .unwrap();

    let service =
        UploadValidationService::from_config(&config, Arc::new(blobs), Arc::new(uploads.clone()));
    let status = service.validate_upload("upload-1").await.unwrap();

    assert_eq!(status.id, "upload-1");
    assert_eq!(status.status, UploadStatus::Succeeded);
    assert!(status.message_list.is_empty());
    assert_eq!(
        uploads.get_upload("upload-1").await.unwrap().status,
        UploadStatus::Succeeded
    );

    // serialized the way clients read it
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["status"], "SUCCEEDED");
    assert!(json["messageList"].as_array().unwrap().is_empty());
}

/// Test the pipeline over a filesystem blob store
#[tokio::test]
async fn test_filesystem_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::default();
    let blobs = FsBlobStore::new(dir.path());

    let material = study_material("study1");
    let key = EncryptorCache::object_key("study1");
    blobs
        .put_object(&config.cert_bucket, &key, material.certificate_pem().unwrap().as_bytes())
        .await
        .unwrap();
    blobs
        .put_object(
            &config.private_key_bucket,
            &key,
            material.private_key_pem().unwrap().as_bytes(),
        )
        .await
        .unwrap();
    blobs
        .put_object(&config.upload_bucket, "upload-1", &encrypted_upload("study1"))
        .await
        .unwrap();

    let uploads = MemoryUploadStore::new();
    uploads.put_upload(Upload::new("upload-1", "study1", "hc-1")).await.unwrap();

    let service = UploadValidationService::from_config(&config, Arc::new(blobs), Arc::new(uploads));
    let status = service.validate_upload("upload-1").await.unwrap();
    assert_eq!(status.status, UploadStatus::Succeeded);
}

/// Test that the archive service and the validator agree on formats
#[tokio::test]
async fn test_archive_service_output_validates() {
    let config = PipelineConfig::default();
    let blobs = MemoryBlobStore::new();
    provision(&blobs, &config, "study1");
    let store: Arc<dyn BlobStore> = Arc::new(blobs.clone());

    let archives = UploadArchiveService::new(
        Arc::new(EncryptorCache::new(
            Arc::clone(&store),
            config.cert_bucket.clone(),
            config.private_key_bucket.clone(),
        )),
        BoundedZipCodec::new(config.archive),
    );
    let body = archives
        .encrypt("study1", &archives.zip(&survey_files()).unwrap())
        .await
        .unwrap();
    blobs.put_object(&config.upload_bucket, "upload-1", body);

    let uploads = MemoryUploadStore::new();
    uploads.put_upload(Upload::new("upload-1", "study1", "hc-1")).await.unwrap();
    let service = UploadValidationService::from_config(&config, store, Arc::new(uploads));

    let status = service.validate_upload("upload-1").await.unwrap();
    assert_eq!(status.status, UploadStatus::Succeeded);
}

/// Test batch validation across studies
#[tokio::test]
async fn test_batch_across_studies() {
    let config = PipelineConfig::default().with_max_concurrent_uploads(2);
    let blobs = MemoryBlobStore::new();
    provision(&blobs, &config, "study1");
    provision(&blobs, &config, "study2");

    let uploads = MemoryUploadStore::new();
    let mut ids = Vec::new();
    for i in 0..4 {
        let study = if i % 2 == 0 { "study1" } else { "study2" };
        let id = format!("upload-{i}");
        blobs.put_object(&config.upload_bucket, &id, encrypted_upload(study));
        uploads.put_upload(Upload::new(id.clone(), study, "hc")).await.unwrap();
        ids.push(id);
    }

    let service =
        UploadValidationService::from_config(&config, Arc::new(blobs), Arc::new(uploads));
    let results = service.validate_batch(ids).await;

    assert_eq!(results.len(), 4);
    assert!(results
        .iter()
        .all(|(_, r)| r.as_ref().unwrap().status == UploadStatus::Succeeded));
    assert_eq!(service.validator().encryptors().len(), 2);
}

/// Upload store whose terminal writes always fail
#[derive(Clone, Default)]
struct FailingResultStore {
    inner: MemoryUploadStore,
}

#[async_trait]
impl UploadMetadataStore for FailingResultStore {
    async fn get_upload(&self, upload_id: &str) -> cohort_core::Result<Upload> {
        self.inner.get_upload(upload_id).await
    }

    async fn put_upload(&self, upload: Upload) -> cohort_core::Result<()> {
        self.inner.put_upload(upload).await
    }

    async fn write_validation_result(
        &self,
        upload_id: &str,
        status: UploadStatus,
        messages: Vec<String>,
    ) -> cohort_core::Result<()> {
        if status.is_terminal() {
            return Err(CoreError::InvalidArgument("metadata store unavailable".to_string()));
        }
        self.inner.write_validation_result(upload_id, status, messages).await
    }
}

/// Test that a failed status write still reports the outcome
#[tokio::test]
async fn test_status_write_failure_is_not_fatal() {
    let config = PipelineConfig::default();
    let blobs = MemoryBlobStore::new();
    provision(&blobs, &config, "study1");
    blobs.put_object(&config.upload_bucket, "upload-1", encrypted_upload("study1"));

    let uploads = FailingResultStore::default();
    uploads.put_upload(Upload::new("upload-1", "study1", "hc-1")).await.unwrap();

    let service =
        UploadValidationService::from_config(&config, Arc::new(blobs), Arc::new(uploads.clone()));
    let status = service.validate_upload("upload-1").await.unwrap();

    assert_eq!(status.status, UploadStatus::Succeeded);
    assert_eq!(
        uploads.get_upload("upload-1").await.unwrap().status,
        UploadStatus::ValidationInProgress
    );
}
