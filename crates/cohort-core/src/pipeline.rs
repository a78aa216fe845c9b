//! Staged upload validation
//!
//! [`UploadValidator::validate`] drives one [`UploadValidationContext`]
//! through an ordered list of [`Stage`]s. Stage errors never escape: each is
//! turned into a [`StageOutcome`] and a message at the stage boundary.
//!
//! - Download failures are terminal.
//! - Decrypt failures fall back to treating the raw bytes as the archive.
//! - Extract and parse failures are terminal; bytes already in the context
//!   are kept.
//!
//! The upload ends `Succeeded` when no stage failed, `ValidationFailed`
//! otherwise.

use crate::archive::BoundedZipCodec;
use crate::context::{ArchiveEntry, Stage, StageOutcome, UploadValidationContext};
use crate::encryptor_cache::EncryptorCache;
use crate::parse::{parse_json_entries, SchemaValidator};
use crate::upload::UploadStatus;
use crate::{CoreError, Result};
use base64::Engine;
use bytes::Bytes;
use cohort_blobstore::{BlobStore, BlobStoreError};
use md5::{Digest, Md5};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Runs the validation stages for one upload at a time
pub struct UploadValidator {
    store: Arc<dyn BlobStore>,
    upload_bucket: String,
    encryptors: Arc<EncryptorCache>,
    codec: BoundedZipCodec,
    schema_validator: Option<Arc<dyn SchemaValidator>>,
    stages: Vec<Stage>,
}

impl UploadValidator {
    /// Create a validator running every stage
    pub fn new(
        store: Arc<dyn BlobStore>,
        upload_bucket: impl Into<String>,
        encryptors: Arc<EncryptorCache>,
        codec: BoundedZipCodec,
    ) -> Self {
        Self {
            store,
            upload_bucket: upload_bucket.into(),
            encryptors,
            codec,
            schema_validator: None,
            stages: Stage::ALL.to_vec(),
        }
    }

    /// Run the given stages instead of all of them
    ///
    /// Order is always canonical; duplicates are dropped.
    pub fn with_stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        let mut stages: Vec<Stage> = stages.into_iter().collect();
        stages.sort();
        stages.dedup();
        self.stages = stages;
        self
    }

    /// Hand parsed entries to a schema validator
    pub fn with_schema_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.schema_validator = Some(validator);
        self
    }

    /// The stages this validator runs
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The encryptor cache shared with other validators
    pub fn encryptors(&self) -> &Arc<EncryptorCache> {
        &self.encryptors
    }

    /// Run the pipeline and set the terminal status
    ///
    /// A context that is already terminal (e.g. `Duplicate`) is returned
    /// untouched.
    #[instrument(skip(self, ctx), fields(upload_id = %ctx.upload_id, study_id = %ctx.study_id))]
    pub async fn validate(&self, mut ctx: UploadValidationContext) -> UploadValidationContext {
        if ctx.status.is_terminal() {
            debug!(status = %ctx.status, "upload already terminal, skipping validation");
            return ctx;
        }
        ctx.status = UploadStatus::ValidationInProgress;

        for &stage in &self.stages {
            let outcome = self.run_stage(stage, &mut ctx).await;
            let stop = outcome.is_failure();
            ctx.record(stage, outcome);
            if stop {
                break;
            }
        }

        ctx.status = if ctx.has_failure() {
            UploadStatus::ValidationFailed
        } else {
            UploadStatus::Succeeded
        };
        info!(status = %ctx.status, messages = ctx.messages().len(), "upload validation finished");
        ctx
    }

    async fn run_stage(&self, stage: Stage, ctx: &mut UploadValidationContext) -> StageOutcome {
        let result = match stage {
            Stage::Download => self.download(ctx).await,
            Stage::Decrypt => return self.decrypt(ctx).await,
            Stage::Extract => self.extract(ctx).await,
            Stage::Parse => self.parse(ctx),
        };
        match result {
            Ok(()) => StageOutcome::Succeeded,
            Err(e) => {
                warn!(%stage, error = %e, "validation stage failed");
                StageOutcome::Failed(e.to_string())
            }
        }
    }

    async fn download(&self, ctx: &mut UploadValidationContext) -> Result<()> {
        let data = match self
            .store
            .get_object_bytes(&self.upload_bucket, &ctx.upload_id)
            .await
        {
            Ok(data) => data,
            Err(BlobStoreError::NotFound { bucket, key }) => {
                return Err(CoreError::BlobNotFound { bucket, key })
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(expected) = &ctx.content_md5 {
            let actual = base64::engine::general_purpose::STANDARD.encode(Md5::digest(&data));
            if &actual != expected {
                return Err(CoreError::ContentMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        debug!(size = data.len(), "downloaded upload");
        ctx.raw_data = Some(data);
        Ok(())
    }

    async fn decrypt(&self, ctx: &mut UploadValidationContext) -> StageOutcome {
        let Some(raw) = ctx.raw_data.clone() else {
            return StageOutcome::Failed("no downloaded data to decrypt".to_string());
        };

        let result = match self.encryptors.get(&ctx.study_id).await {
            Ok(encryptor) => {
                let ciphertext = raw.clone();
                match tokio::task::spawn_blocking(move || encryptor.decrypt(&ciphertext)).await {
                    Ok(result) => result.map_err(CoreError::from),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => {
                if e.is_key_material() {
                    error!(
                        alert = true,
                        study_id = %ctx.study_id,
                        error = %e,
                        "study key material unavailable; uploads for this study cannot be decrypted"
                    );
                }
                Err(e)
            }
        };

        match result {
            Ok(plaintext) => {
                ctx.decrypted_data = Some(Bytes::from(plaintext));
                StageOutcome::Succeeded
            }
            Err(e) => {
                warn!(error = %e, "decryption failed, falling back to raw bytes");
                ctx.decrypted_data = Some(raw);
                StageOutcome::FellBack(e.to_string())
            }
        }
    }

    async fn extract(&self, ctx: &mut UploadValidationContext) -> Result<()> {
        let data = ctx
            .decrypted_data
            .clone()
            .or_else(|| ctx.raw_data.clone())
            .ok_or_else(|| CoreError::Archive("no data to extract".to_string()))?;

        let codec = self.codec.clone();
        let files = tokio::task::spawn_blocking(move || codec.unzip(&data)).await??;
        debug!(entries = files.len(), "extracted upload archive");
        ctx.entries = files
            .into_iter()
            .map(|(name, content)| {
                let entry = ArchiveEntry::new(name.clone(), content);
                (name, entry)
            })
            .collect();
        Ok(())
    }

    fn parse(&self, ctx: &mut UploadValidationContext) -> Result<()> {
        let parsed = parse_json_entries(&mut ctx.entries)?;
        debug!(parsed, "parsed JSON entries");
        if let Some(validator) = &self.schema_validator {
            validator.validate(&ctx.study_id, &ctx.entries)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for UploadValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadValidator")
            .field("upload_bucket", &self.upload_bucket)
            .field("limits", &self.codec.limits())
            .field("stages", &self.stages)
            .field("schema_validator", &self.schema_validator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveLimits;
    use crate::parse::RequiredEntries;
    use cohort_blobstore::MemoryBlobStore;
    use cohort_crypto::{EnvelopeEncryptor, KeyMaterial};
    use std::collections::BTreeMap;
    use std::sync::OnceLock;

    const UPLOADS: &str = "uploads";
    const CERTS: &str = "certs";
    const KEYS: &str = "keys";

    fn material() -> &'static KeyMaterial {
        static MATERIAL: OnceLock<KeyMaterial> = OnceLock::new();
        MATERIAL.get_or_init(|| KeyMaterial::generate("study1").unwrap())
    }

    fn archive() -> Vec<u8> {
        let mut files = BTreeMap::new();
        files.insert("info.json".to_string(), br#"{"item":"survey"}"#.to_vec());
        files.insert("notes.txt".to_string(), b"hello".to_vec());
        BoundedZipCodec::default().zip(&files).unwrap()
    }

    fn validator(store: &MemoryBlobStore) -> UploadValidator {
        let material = material();
        store.put_object(CERTS, "study1.pem", material.certificate_pem().unwrap());
        store.put_object(KEYS, "study1.pem", material.private_key_pem().unwrap().to_string());

        let store: Arc<dyn BlobStore> = Arc::new(store.clone());
        let cache = Arc::new(EncryptorCache::new(Arc::clone(&store), CERTS, KEYS));
        UploadValidator::new(store, UPLOADS, cache, BoundedZipCodec::default())
    }

    fn encrypt(plaintext: &[u8]) -> Vec<u8> {
        EnvelopeEncryptor::from_key_material(material())
            .unwrap()
            .encrypt(plaintext)
            .unwrap()
    }

    fn encrypted_archive() -> Vec<u8> {
        encrypt(&archive())
    }

    #[tokio::test]
    async fn test_happy_path() {
        let store = MemoryBlobStore::new();
        let validator = validator(&store);
        let plaintext = archive();
        store.put_object(UPLOADS, "u1", encrypt(&plaintext));

        let ctx = validator
            .validate(UploadValidationContext::new("u1", "study1"))
            .await;

        assert_eq!(ctx.status, UploadStatus::Succeeded);
        assert!(Stage::ALL
            .iter()
            .all(|s| *ctx.outcome(*s) == StageOutcome::Succeeded));
        assert!(ctx.messages().is_empty());
        assert_eq!(ctx.entry_names(), vec!["info.json", "notes.txt"]);
        assert_eq!(
            ctx.entries["info.json"].json,
            Some(serde_json::json!({"item": "survey"}))
        );
        assert_eq!(ctx.decrypted_data.as_deref(), Some(plaintext.as_slice()));
    }

    #[tokio::test]
    async fn test_missing_upload_fails_at_download() {
        let store = MemoryBlobStore::new();
        let validator = validator(&store);

        let ctx = validator
            .validate(UploadValidationContext::new("missing", "study1"))
            .await;

        assert_eq!(ctx.status, UploadStatus::ValidationFailed);
        assert!(ctx.outcome(Stage::Download).is_failure());
        assert_eq!(*ctx.outcome(Stage::Decrypt), StageOutcome::NotRun);
        assert_eq!(ctx.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_unencrypted_zip_falls_back() {
        let store = MemoryBlobStore::new();
        let validator = validator(&store);
        store.put_object(UPLOADS, "u1", archive());

        let ctx = validator
            .validate(UploadValidationContext::new("u1", "study1"))
            .await;

        assert!(matches!(ctx.outcome(Stage::Decrypt), StageOutcome::FellBack(_)));
        assert_eq!(*ctx.outcome(Stage::Extract), StageOutcome::Succeeded);
        assert_eq!(ctx.status, UploadStatus::Succeeded);
        assert_eq!(ctx.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_study_falls_back() {
        let store = MemoryBlobStore::new();
        let validator = validator(&store);
        store.put_object(UPLOADS, "u1", b"neither encrypted nor zipped".to_vec());

        let ctx = validator
            .validate(UploadValidationContext::new("u1", "no-such-study"))
            .await;

        assert!(matches!(ctx.outcome(Stage::Decrypt), StageOutcome::FellBack(msg) if msg.contains("unknown study")));
        assert!(ctx.outcome(Stage::Extract).is_failure());
        assert_eq!(*ctx.outcome(Stage::Parse), StageOutcome::NotRun);
        assert_eq!(ctx.status, UploadStatus::ValidationFailed);
        // decrypted bytes survive the extract failure
        assert_eq!(
            ctx.decrypted_data.as_deref(),
            Some(b"neither encrypted nor zipped".as_slice())
        );
    }

    #[tokio::test]
    async fn test_content_md5_checked() {
        let store = MemoryBlobStore::new();
        let validator = validator(&store);
        let data = encrypted_archive();
        store.put_object(UPLOADS, "u1", data.clone());

        let good = base64::engine::general_purpose::STANDARD.encode(Md5::digest(&data));
        let ctx = validator
            .validate(UploadValidationContext::new("u1", "study1").with_content_md5(good))
            .await;
        assert_eq!(ctx.status, UploadStatus::Succeeded);

        let ctx = validator
            .validate(UploadValidationContext::new("u1", "study1").with_content_md5("AAAAAAAAAAAAAAAAAAAAAA=="))
            .await;
        assert_eq!(ctx.status, UploadStatus::ValidationFailed);
        assert!(ctx.messages()[0].contains("MD5 mismatch"));
    }

    #[tokio::test]
    async fn test_schema_rejection_fails_parse() {
        let store = MemoryBlobStore::new();
        let validator = validator(&store)
            .with_schema_validator(Arc::new(RequiredEntries::new(["metadata.json"])));
        store.put_object(UPLOADS, "u1", encrypted_archive());

        let ctx = validator
            .validate(UploadValidationContext::new("u1", "study1"))
            .await;

        assert_eq!(*ctx.outcome(Stage::Extract), StageOutcome::Succeeded);
        assert!(ctx.outcome(Stage::Parse).is_failure());
        assert_eq!(ctx.status, UploadStatus::ValidationFailed);
        // extracted entries are kept for inspection
        assert_eq!(ctx.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_limits_apply_in_extract() {
        let store = MemoryBlobStore::new();
        let material = material();
        store.put_object(CERTS, "study1.pem", material.certificate_pem().unwrap());
        store.put_object(KEYS, "study1.pem", material.private_key_pem().unwrap().to_string());
        store.put_object(UPLOADS, "u1", encrypted_archive());

        let store: Arc<dyn BlobStore> = Arc::new(store);
        let cache = Arc::new(EncryptorCache::new(Arc::clone(&store), CERTS, KEYS));
        let codec = BoundedZipCodec::new(ArchiveLimits::new(1024, 1));
        let validator = UploadValidator::new(store, UPLOADS, cache, codec);

        let ctx = validator
            .validate(UploadValidationContext::new("u1", "study1"))
            .await;
        assert_eq!(*ctx.outcome(Stage::Decrypt), StageOutcome::Succeeded);
        assert!(ctx.messages()[0].contains("more than 1 entries"));
        assert_eq!(ctx.status, UploadStatus::ValidationFailed);
    }

    #[tokio::test]
    async fn test_terminal_context_untouched() {
        let store = MemoryBlobStore::new();
        let validator = validator(&store);

        let mut ctx = UploadValidationContext::new("u1", "study1");
        ctx.status = UploadStatus::Duplicate;
        let ctx = validator.validate(ctx).await;

        assert_eq!(ctx.status, UploadStatus::Duplicate);
        assert_eq!(*ctx.outcome(Stage::Download), StageOutcome::NotRun);
    }

    #[test]
    fn test_with_stages_keeps_canonical_order() {
        let store = MemoryBlobStore::new();
        let validator = validator(&store).with_stages([Stage::Extract, Stage::Download, Stage::Extract]);
        assert_eq!(validator.stages(), &[Stage::Download, Stage::Extract]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_concurrent_validations_on_single_thread_runtime() {
        let store = MemoryBlobStore::new();
        let validator = validator(&store);
        store.put_object(UPLOADS, "u1", encrypted_archive());
        store.put_object(UPLOADS, "u2", encrypted_archive());

        let (first, second) = tokio::join!(
            validator.validate(UploadValidationContext::new("u1", "study1")),
            validator.validate(UploadValidationContext::new("u2", "study1")),
        );
        assert_eq!(first.status, UploadStatus::Succeeded);
        assert_eq!(second.status, UploadStatus::Succeeded);
        assert_eq!(second.entry_names(), vec!["info.json", "notes.txt"]);
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_worker_error() {
        let join_error = tokio::task::spawn_blocking(|| -> Vec<u8> { panic!("decoder crashed") })
            .await
            .unwrap_err();
        let err = CoreError::from(join_error);
        assert!(matches!(err, CoreError::Worker(_)));
        assert!(err.to_string().starts_with("worker task failed"));
    }
}
