//! Per-upload validation state

use crate::upload::{Upload, UploadStatus};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pipeline stages in canonical order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Fetch raw ciphertext from blob storage
    Download,
    /// Envelope-decrypt with the study key, falling back to the raw bytes
    Decrypt,
    /// Bounded unzip into archive entries
    Extract,
    /// Parse JSON entries and run the schema validator
    Parse,
}

impl Stage {
    /// Every stage, in the order the pipeline runs them
    pub const ALL: [Stage; 4] = [Stage::Download, Stage::Decrypt, Stage::Extract, Stage::Parse];

    /// Lowercase stage name
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Decrypt => "decrypt",
            Stage::Extract => "extract",
            Stage::Parse => "parse",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What happened when a stage ran
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    /// The stage has not run
    #[default]
    NotRun,
    /// The stage completed
    Succeeded,
    /// The stage failed but the pipeline recovered and continued
    FellBack(String),
    /// The stage failed; later stages are skipped
    Failed(String),
}

impl StageOutcome {
    /// Whether this outcome stops the pipeline
    pub fn is_failure(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }
}

/// One file inside a decrypted archive
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Entry name, unique within the archive
    pub name: String,
    /// Raw entry bytes, exactly as extracted
    pub content: Vec<u8>,
    /// Parsed value for JSON entries, filled in by the parse stage
    pub json: Option<serde_json::Value>,
}

impl ArchiveEntry {
    /// Create an unparsed entry
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content,
            json: None,
        }
    }

    /// Whether the entry should be parsed as JSON
    pub fn is_json(&self) -> bool {
        self.name.to_ascii_lowercase().ends_with(".json")
    }

    /// Content as UTF-8 text, if it is
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// Mutable record threaded through the pipeline for one upload
///
/// Owned by exactly one task for the duration of one validation.
#[derive(Clone, Debug)]
pub struct UploadValidationContext {
    /// Upload id; also the raw object key
    pub upload_id: String,
    /// Study whose key decrypts the upload
    pub study_id: String,
    /// Pseudonymous participant identifier
    pub health_code: String,
    /// Expected base64 MD5 of the raw bytes
    pub content_md5: Option<String>,
    /// Raw bytes from blob storage
    pub raw_data: Option<Bytes>,
    /// Archive bytes; the raw bytes when decryption fell back
    pub decrypted_data: Option<Bytes>,
    /// Extracted entries keyed by name
    pub entries: BTreeMap<String, ArchiveEntry>,
    /// Current lifecycle state
    pub status: UploadStatus,
    messages: Vec<String>,
    outcomes: [StageOutcome; 4],
}

impl UploadValidationContext {
    /// Start a context for a bare upload id and study
    pub fn new(upload_id: impl Into<String>, study_id: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
            study_id: study_id.into(),
            health_code: String::new(),
            content_md5: None,
            raw_data: None,
            decrypted_data: None,
            entries: BTreeMap::new(),
            status: UploadStatus::Requested,
            messages: Vec::new(),
            outcomes: Default::default(),
        }
    }

    /// Start a context from an upload record
    pub fn from_upload(upload: &Upload) -> Self {
        let mut ctx = Self::new(upload.upload_id.clone(), upload.study_id.clone());
        ctx.health_code = upload.health_code.clone();
        ctx.content_md5 = upload.content_md5.clone();
        ctx.status = upload.status;
        ctx
    }

    /// Set the expected content checksum
    pub fn with_content_md5(mut self, content_md5: impl Into<String>) -> Self {
        self.content_md5 = Some(content_md5.into());
        self
    }

    /// Append a validation message
    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Messages in the order they were recorded
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Outcome of a stage
    pub fn outcome(&self, stage: Stage) -> &StageOutcome {
        &self.outcomes[stage.index()]
    }

    /// Record a stage outcome; failures and fallbacks also become messages
    pub fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        match &outcome {
            StageOutcome::FellBack(msg) => {
                self.add_message(format!("{stage}: {msg}; continuing with undecrypted bytes"))
            }
            StageOutcome::Failed(msg) => self.add_message(format!("{stage} failed: {msg}")),
            StageOutcome::NotRun | StageOutcome::Succeeded => {}
        }
        self.outcomes[stage.index()] = outcome;
    }

    /// Whether any stage failed
    pub fn has_failure(&self) -> bool {
        self.outcomes.iter().any(StageOutcome::is_failure)
    }

    /// Entry names in order
    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}
