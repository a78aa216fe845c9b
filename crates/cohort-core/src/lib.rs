//! # Cohort Core
//!
//! Upload security and extraction pipeline for the Cohort research platform.
//!
//! This crate provides:
//! - **Bounded Zip Codec**: archive extraction that survives decompression
//!   bombs, oversized entries and duplicate names
//! - **Encryptor Cache**: per-study envelope encryptors loaded once from blob
//!   storage, single flight under concurrency
//! - **Validation Pipeline**: download → decrypt → extract → parse, with a
//!   recorded outcome per stage and decrypt fallback
//! - **Validation Service**: upload lifecycle and batch validation on top of
//!   an upload metadata store
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        UploadValidationService          │
//! ├─────────────────────────────────────────┤
//! │   UploadValidator (staged pipeline)     │
//! ├───────────────────┬─────────────────────┤
//! │  EncryptorCache   │   BoundedZipCodec   │
//! ├───────────────────┴─────────────────────┤
//! │       BlobStore / UploadMetadataStore   │
//! └─────────────────────────────────────────┘
//! ```

pub mod archive;
pub mod archive_service;
pub mod config;
pub mod context;
pub mod encryptor_cache;
pub mod error;
pub mod parse;
pub mod pipeline;
pub mod service;
pub mod upload;

pub use archive::{ArchiveLimits, BoundedZipCodec};
pub use archive_service::UploadArchiveService;
pub use config::PipelineConfig;
pub use context::{ArchiveEntry, Stage, StageOutcome, UploadValidationContext};
pub use encryptor_cache::EncryptorCache;
pub use error::{CoreError, Result, ZipOverflow};
pub use parse::{parse_json_entries, RequiredEntries, SchemaValidator};
pub use pipeline::UploadValidator;
pub use service::UploadValidationService;
pub use upload::{
    MemoryUploadStore, Upload, UploadMetadataStore, UploadStatus, UploadValidationStatus,
};
