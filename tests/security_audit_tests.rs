//! Security Audit Tests
//!
//! Hostile uploads: decompression bombs, duplicate and excess entries,
//! tampered ciphertext and uploads encrypted for the wrong study.

use cohort_blobstore::MemoryBlobStore;
use cohort_core::{
    ArchiveLimits, EncryptorCache, MemoryUploadStore, PipelineConfig, Upload, UploadMetadataStore,
    UploadStatus, UploadValidationService,
};
use cohort_crypto::{EnvelopeEncryptor, KeyMaterial};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, OnceLock};

fn material() -> &'static KeyMaterial {
    static MATERIAL: OnceLock<KeyMaterial> = OnceLock::new();
    MATERIAL.get_or_init(|| KeyMaterial::generate("study1").unwrap())
}

/// Validate one upload body for study1 and return the stored record
async fn validate(config: PipelineConfig, body: Vec<u8>) -> Upload {
    let blobs = MemoryBlobStore::new();
    let key = EncryptorCache::object_key("study1");
    blobs.put_object(&config.cert_bucket, &key, material().certificate_pem().unwrap());
    blobs.put_object(
        &config.private_key_bucket,
        &key,
        material().private_key_pem().unwrap().to_string(),
    );
    blobs.put_object(&config.upload_bucket, "upload-1", body);

    let uploads = MemoryUploadStore::new();
    uploads.put_upload(Upload::new("upload-1", "study1", "hc-1")).await.unwrap();

    let service =
        UploadValidationService::from_config(&config, Arc::new(blobs), Arc::new(uploads.clone()));
    service.validate_upload("upload-1").await.unwrap();
    uploads.get_upload("upload-1").await.unwrap()
}

fn encrypt(plaintext: &[u8]) -> Vec<u8> {
    EnvelopeEncryptor::from_key_material(material())
        .unwrap()
        .encrypt(plaintext)
        .unwrap()
}

/// Write entries without any limits, in the given order
fn raw_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Overwrite every recorded uncompressed size of a one-entry archive
fn under_report(archive: &mut [u8], size: u32) {
    archive[22..26].copy_from_slice(&size.to_le_bytes());
    let directory = archive
        .windows(4)
        .rposition(|w| w == b"PK\x01\x02")
        .unwrap();
    archive[directory + 24..directory + 28].copy_from_slice(&size.to_le_bytes());
}

fn failure_message(upload: &Upload, stage: &str) -> String {
    upload
        .validation_messages
        .iter()
        .find(|m| m.starts_with(stage))
        .cloned()
        .unwrap_or_default()
}

/// Decompression bombs
mod zip_bombs {
    use super::*;

    #[tokio::test]
    async fn test_declared_oversize_entry_rejected() {
        let config = PipelineConfig::default()
            .with_archive_limits(ArchiveLimits::new(64 * 1024, 10));
        let body = encrypt(&raw_zip(&[("big.bin", &vec![0u8; 1024 * 1024])]));

        let upload = validate(config, body).await;
        assert_eq!(upload.status, UploadStatus::ValidationFailed);
        assert!(failure_message(&upload, "extract").contains("big.bin"));
    }

    #[tokio::test]
    async fn test_lying_header_rejected() {
        let config = PipelineConfig::default()
            .with_archive_limits(ArchiveLimits::new(64 * 1024, 10));
        let mut archive = raw_zip(&[("bomb.bin", &vec![0u8; 4 * 1024 * 1024])]);
        under_report(&mut archive, 100);

        let upload = validate(config, encrypt(&archive)).await;
        assert_eq!(upload.status, UploadStatus::ValidationFailed);
        assert!(failure_message(&upload, "extract").contains("exceeds"));
    }

    #[tokio::test]
    async fn test_too_many_entries_rejected() {
        let config = PipelineConfig::default()
            .with_archive_limits(ArchiveLimits::new(1024, 5));
        let names: Vec<String> = (0..6).map(|i| format!("part-{i}.json")).collect();
        let entries: Vec<(&str, &[u8])> =
            names.iter().map(|n| (n.as_str(), b"{}".as_slice())).collect();

        let upload = validate(config, encrypt(&raw_zip(&entries))).await;
        assert_eq!(upload.status, UploadStatus::ValidationFailed);
        assert!(failure_message(&upload, "extract").contains("more than 5 entries"));
    }
}

/// Archive structure attacks
mod archive_structure {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let mut archive = raw_zip(&[("info-a.json", b"{}"), ("info-b.json", b"{\"evil\":true}")]);
        let from = b"info-b.json";
        let positions: Vec<usize> = archive
            .windows(from.len())
            .enumerate()
            .filter(|(_, w)| *w == from.as_slice())
            .map(|(i, _)| i)
            .collect();
        for i in positions {
            archive[i..i + from.len()].copy_from_slice(b"info-a.json");
        }

        let upload = validate(PipelineConfig::default(), encrypt(&archive)).await;
        assert_eq!(upload.status, UploadStatus::ValidationFailed);
        assert!(failure_message(&upload, "extract").contains("info-a.json"));
    }

    #[tokio::test]
    async fn test_not_a_zip_rejected() {
        let upload = validate(PipelineConfig::default(), encrypt(b"just some text")).await;
        assert_eq!(upload.status, UploadStatus::ValidationFailed);
    }

    #[tokio::test]
    async fn test_invalid_json_rejected() {
        let body = encrypt(&raw_zip(&[("info.json", b"{\"unterminated\": ")]));
        let upload = validate(PipelineConfig::default(), body).await;
        assert_eq!(upload.status, UploadStatus::ValidationFailed);
        assert!(failure_message(&upload, "parse").contains("info.json"));
    }
}

/// Ciphertext integrity and key separation
mod envelope_integrity {
    use super::*;

    fn archive() -> Vec<u8> {
        let mut files = BTreeMap::new();
        files.insert("info.json".to_string(), br#"{"item":"survey"}"#.to_vec());
        cohort_core::BoundedZipCodec::default().zip(&files).unwrap()
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_never_yields_plaintext() {
        let mut body = encrypt(&archive());
        let mid = body.len() / 2;
        body[mid] ^= 0x80;

        let upload = validate(PipelineConfig::default(), body).await;
        // decryption fails, the raw ciphertext is not a zip
        assert!(failure_message(&upload, "decrypt").contains("continuing with undecrypted bytes"));
        assert_eq!(upload.status, UploadStatus::ValidationFailed);
    }

    #[tokio::test]
    async fn test_upload_for_other_study_is_not_decrypted() {
        let other = KeyMaterial::generate("study2").unwrap();
        let body = EnvelopeEncryptor::from_key_material(&other)
            .unwrap()
            .encrypt(&archive())
            .unwrap();

        let upload = validate(PipelineConfig::default(), body).await;
        assert!(!failure_message(&upload, "decrypt").is_empty());
        assert_eq!(upload.status, UploadStatus::ValidationFailed);
    }

    #[test]
    fn test_leaked_public_certificate_cannot_decrypt() {
        let ciphertext = encrypt(b"participant data");
        let public_only = EnvelopeEncryptor::encrypt_only(material().certificate()).unwrap();
        assert!(!public_only.can_decrypt());
        assert!(public_only.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_debug_output_omits_private_key() {
        let encryptor = EnvelopeEncryptor::from_key_material(material()).unwrap();
        let debug = format!("{encryptor:?}");
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
