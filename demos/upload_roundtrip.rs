//! Upload validation roundtrip
//!
//! This demo:
//! - Provisions key material for a study
//! - Builds and encrypts an upload archive the way a participant app would
//! - Validates the upload through the full pipeline
//! - Shows a plain (unencrypted) archive falling back at the decrypt stage
//!
//! Run with: cargo run --example upload_roundtrip

use base64::Engine;
use cohort_blobstore::{BlobStore, MemoryBlobStore};
use cohort_core::{
    BoundedZipCodec, EncryptorCache, MemoryUploadStore, PipelineConfig, Upload,
    UploadArchiveService, UploadMetadataStore, UploadValidationService,
};
use cohort_crypto::KeyMaterial;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cohort_core=debug,upload_roundtrip=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env()?;
    tracing::info!(?config, "loaded pipeline configuration");

    // ==================== Key Material ====================

    let material = KeyMaterial::generate("demo-study")?;
    let blobs = MemoryBlobStore::new();
    let key = EncryptorCache::object_key("demo-study");
    blobs.put_object(&config.cert_bucket, &key, material.certificate_pem()?);
    blobs.put_object(
        &config.private_key_bucket,
        &key,
        material.private_key_pem()?.to_string(),
    );
    tracing::info!(subject = material.certificate().subject(), "provisioned study key material");

    // ==================== Participant Side ====================

    let blob_store: Arc<dyn BlobStore> = Arc::new(blobs.clone());
    let archives = UploadArchiveService::new(
        Arc::new(EncryptorCache::new(
            Arc::clone(&blob_store),
            config.cert_bucket.clone(),
            config.private_key_bucket.clone(),
        )),
        BoundedZipCodec::new(config.archive),
    );

    let mut files = BTreeMap::new();
    files.insert(
        "info.json".to_string(),
        br#"{"item":"walking-activity","schemaRevision":2}"#.to_vec(),
    );
    files.insert("steps.json".to_string(), br#"{"steps":4210}"#.to_vec());
    files.insert("notes.txt".to_string(), b"felt fine".to_vec());

    let encrypted = archives.encrypt("demo-study", &archives.zip(&files)?).await?;
    let plain = archives.zip(&files)?;

    let uploads = MemoryUploadStore::new();
    for (upload_id, body) in [("upload-encrypted", encrypted), ("upload-plain", plain)] {
        let md5 = base64::engine::general_purpose::STANDARD.encode(Md5::digest(&body));
        let upload = Upload::new(upload_id, "demo-study", "healthcode-1")
            .with_content(md5, body.len() as u64);
        blobs.put_object(&config.upload_bucket, upload_id, body);
        uploads.put_upload(upload).await?;
    }

    // ==================== Validation ====================

    let service = UploadValidationService::from_config(&config, blob_store, Arc::new(uploads));
    let results = service
        .validate_batch(["upload-encrypted".to_string(), "upload-plain".to_string()])
        .await;

    for (upload_id, result) in results {
        match result {
            Ok(status) => println!("{upload_id}: {}", serde_json::to_string_pretty(&status)?),
            Err(e) => println!("{upload_id}: error: {e}"),
        }
    }

    Ok(())
}
