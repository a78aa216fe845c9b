//! Parse stage helpers and the schema validation seam

use crate::context::ArchiveEntry;
use crate::{CoreError, Result};
use std::collections::BTreeMap;

/// Field-level validation of an extracted archive
///
/// Implemented outside this crate by whatever knows the study's schemas. The
/// pipeline only calls it once every JSON entry has parsed.
pub trait SchemaValidator: Send + Sync {
    /// Inspect the entries; reject with [`CoreError::SchemaRejected`]
    fn validate(&self, study_id: &str, entries: &BTreeMap<String, ArchiveEntry>) -> Result<()>;
}

/// Parse every `*.json` entry in place
///
/// Raw bytes are left untouched; the parsed value goes into
/// [`ArchiveEntry::json`].
pub fn parse_json_entries(entries: &mut BTreeMap<String, ArchiveEntry>) -> Result<usize> {
    let mut parsed = 0;
    for entry in entries.values_mut().filter(|entry| entry.is_json()) {
        let value = serde_json::from_slice(&entry.content).map_err(|e| CoreError::Parse {
            name: entry.name.clone(),
            reason: e.to_string(),
        })?;
        entry.json = Some(value);
        parsed += 1;
    }
    Ok(parsed)
}

/// Rejects archives missing any of a fixed set of entry names
#[derive(Clone, Debug, Default)]
pub struct RequiredEntries {
    names: Vec<String>,
}

impl RequiredEntries {
    /// Require each of `names`
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl SchemaValidator for RequiredEntries {
    fn validate(&self, _study_id: &str, entries: &BTreeMap<String, ArchiveEntry>) -> Result<()> {
        let missing: Vec<&str> = self
            .names
            .iter()
            .filter(|name| !entries.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::SchemaRejected(format!(
                "missing required entries: {}",
                missing.join(", ")
            )))
        }
    }
}
