//! Bounded zip codec
//!
//! Upload archives are attacker controlled. Extraction reads the central
//! directory, then walks the entries one at a time and enforces, in order:
//!
//! 1. the entry count, before an entry is processed
//! 2. name uniqueness, checked on the raw directory names
//! 3. the size declared in the directory, before an entry body is read
//! 4. the actual decompressed size, while the body streams through a fixed
//!    buffer (catches directories that under-report)
//!
//! Any violation aborts immediately and the partial entry buffer is dropped.
//! Entries written with trailing data descriptors (streamed archives) carry
//! their sizes in the directory and extract like any other.

use crate::{CoreError, Result, ZipOverflow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read, Write};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Default per-entry decompressed size limit (10 MiB)
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 10 * 1024 * 1024;

/// Default entry count limit
pub const DEFAULT_MAX_ENTRY_COUNT: usize = 100;

const READ_BUFFER_SIZE: usize = 4096;

const END_OF_DIRECTORY_SIGNATURE: &[u8; 4] = b"PK\x05\x06";
const END_OF_DIRECTORY_LEN: usize = 22;
const DIRECTORY_HEADER_SIGNATURE: &[u8; 4] = b"PK\x01\x02";
const DIRECTORY_HEADER_LEN: usize = 46;

/// Resource limits for archive extraction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLimits {
    /// Maximum decompressed size of any single entry
    pub max_entry_size_bytes: u64,
    /// Maximum number of entries, directories included
    pub max_entry_count: usize,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entry_size_bytes: DEFAULT_MAX_ENTRY_SIZE,
            max_entry_count: DEFAULT_MAX_ENTRY_COUNT,
        }
    }
}

impl ArchiveLimits {
    /// Create limits
    pub fn new(max_entry_size_bytes: u64, max_entry_count: usize) -> Self {
        Self {
            max_entry_size_bytes,
            max_entry_count,
        }
    }
}

/// Zip codec with per-instance extraction limits
#[derive(Clone, Debug, Default)]
pub struct BoundedZipCodec {
    limits: ArchiveLimits,
}

impl BoundedZipCodec {
    /// Create a codec enforcing `limits`
    pub fn new(limits: ArchiveLimits) -> Self {
        Self { limits }
    }

    /// The limits this codec enforces
    pub fn limits(&self) -> ArchiveLimits {
        self.limits
    }

    /// Pack named entries into a deflated archive
    ///
    /// No limits apply: the service controls what it compresses.
    pub fn zip(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, content) in entries {
            writer.start_file(name.as_str(), options)?;
            writer
                .write_all(content)
                .map_err(|e| CoreError::Archive(format!("writing {name}: {e}")))?;
        }
        Ok(writer.finish()?.into_inner())
    }

    /// Unpack an untrusted archive into named entries
    pub fn unzip(&self, data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
        let max_size = self.limits.max_entry_size_bytes;
        let max_count = self.limits.max_entry_count;

        // The reader indexes entries by name, so repeats must be caught on
        // the raw directory before it collapses them.
        if let Some(names) = directory_names(data) {
            let mut raw_seen = HashSet::new();
            for (index, raw) in names.iter().enumerate() {
                if index >= max_count {
                    warn!(max = max_count, "archive entry count exceeded");
                    return Err(ZipOverflow::TooManyEntries { max: max_count }.into());
                }
                if !raw_seen.insert(*raw) {
                    let name = String::from_utf8_lossy(raw).into_owned();
                    warn!(entry = %name, "duplicate archive entry");
                    return Err(CoreError::DuplicateEntry(name));
                }
            }
        }

        let mut archive = ZipArchive::new(Cursor::new(data))?;
        let mut entries = BTreeMap::new();
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        for index in 0..archive.len() {
            if index >= max_count {
                warn!(max = max_count, "archive entry count exceeded");
                return Err(ZipOverflow::TooManyEntries { max: max_count }.into());
            }

            let mut entry = archive.by_index(index)?;
            let name = entry.name().to_string();
            if entry.is_dir() {
                continue;
            }

            let declared = entry.size();
            if declared > max_size {
                warn!(entry = %name, declared, max = max_size, "archive entry declares oversized content");
                return Err(ZipOverflow::DeclaredSizeTooLarge {
                    name,
                    declared,
                    max: max_size,
                }
                .into());
            }

            if entries.contains_key(&name) {
                warn!(entry = %name, "duplicate archive entry");
                return Err(CoreError::DuplicateEntry(name));
            }

            let mut content = Vec::with_capacity(declared as usize);
            let mut total: u64 = 0;
            loop {
                let n = entry
                    .read(&mut buffer)
                    .map_err(|e| CoreError::Archive(format!("reading {name}: {e}")))?;
                if n == 0 {
                    break;
                }
                total += n as u64;
                if total > max_size {
                    warn!(entry = %name, declared, max = max_size, "archive entry exceeded limit while decompressing");
                    return Err(ZipOverflow::EntryTooLarge { name, max: max_size }.into());
                }
                content.extend_from_slice(&buffer[..n]);
            }

            debug!(entry = %name, size = total, "extracted archive entry");
            entries.insert(name, content);
        }

        Ok(entries)
    }
}

/// Raw entry names from the central directory, in directory order
///
/// Returns `None` for anything this scan does not understand (zip64, a
/// truncated directory, no end record); the archive reader decides those.
fn directory_names(data: &[u8]) -> Option<Vec<&[u8]>> {
    let u16_at = |pos: usize| -> Option<usize> {
        data.get(pos..pos + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
    };
    let u32_at = |pos: usize| -> Option<u32> {
        data.get(pos..pos + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };

    let last = data.len().checked_sub(END_OF_DIRECTORY_LEN)?;
    let first = last.saturating_sub(u16::MAX as usize);
    let end = (first..=last)
        .rev()
        .find(|&pos| &data[pos..pos + 4] == END_OF_DIRECTORY_SIGNATURE)?;

    let count = u16_at(end + 10)?;
    let offset = u32_at(end + 16)?;
    if count == u16::MAX as usize || offset == u32::MAX {
        return None;
    }

    let mut names = Vec::with_capacity(count);
    let mut pos = offset as usize;
    for _ in 0..count {
        if data.get(pos..pos + 4)? != DIRECTORY_HEADER_SIGNATURE {
            return None;
        }
        let name_len = u16_at(pos + 28)?;
        let extra_len = u16_at(pos + 30)?;
        let comment_len = u16_at(pos + 32)?;
        let name_start = pos + DIRECTORY_HEADER_LEN;
        names.push(data.get(name_start..name_start + name_len)?);
        pos = name_start + name_len + extra_len + comment_len;
    }
    Some(names)
}
