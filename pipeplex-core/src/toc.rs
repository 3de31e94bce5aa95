//! Segment table of contents: where each oid's bytes sit in the multiplexed stream.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HelperError, Oid, Result};

const FINALIZED_MODE: u32 = 0o444;

/// Half-open `[start_byte, end_byte)` range of uncompressed stream bytes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDataEntry {
    #[serde(rename = "startbyte")]
    pub start_byte: u64,
    #[serde(rename = "endbyte")]
    pub end_byte: u64,
}

impl SegmentDataEntry {
    pub fn len(&self) -> u64 {
        self.end_byte - self.start_byte
    }

    pub fn is_empty(&self) -> bool {
        self.start_byte == self.end_byte
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(from = "TocFile")]
pub struct SegmentToc {
    #[serde(rename = "lastbyteread")]
    pub last_byte_read: u64,
    #[serde(rename = "dataentries")]
    pub data_entries: BTreeMap<Oid, SegmentDataEntry>,
}

/// On-disk layout. Older manifests carry only `dataentries`; their cursor is
/// the furthest end byte.
#[derive(Deserialize)]
struct TocFile {
    #[serde(rename = "lastbyteread")]
    last_byte_read: Option<u64>,
    #[serde(rename = "dataentries", default)]
    data_entries: BTreeMap<Oid, SegmentDataEntry>,
}

impl From<TocFile> for SegmentToc {
    fn from(f: TocFile) -> Self {
        let last_byte_read = f.last_byte_read.unwrap_or_else(|| {
            f.data_entries.values().map(|e| e.end_byte).max().unwrap_or(0)
        });
        Self {
            last_byte_read,
            data_entries: f.data_entries,
        }
    }
}

impl SegmentToc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let toc: SegmentToc = serde_yaml::from_str(&text)
            .map_err(|e| HelperError::Toc(format!("{}: {e}", path.display())))?;
        toc.validate()
            .map_err(|e| HelperError::Toc(format!("{}: {e}", path.display())))?;
        Ok(toc)
    }

    /// Load a partial TOC left by an earlier run, or start an empty one.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        if is_finalized(path)? {
            return Err(HelperError::Toc(format!(
                "{} is finalized; nothing to resume",
                path.display()
            )));
        }
        Self::load(path)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        for (oid, e) in &self.data_entries {
            if e.start_byte > e.end_byte {
                return Err(format!(
                    "oid {oid}: start byte {} is past end byte {}",
                    e.start_byte, e.end_byte
                ));
            }
            if e.end_byte > self.last_byte_read {
                return Err(format!(
                    "oid {oid}: end byte {} is past last byte read {}",
                    e.end_byte, self.last_byte_read
                ));
            }
        }
        Ok(())
    }

    pub fn add_entry(&mut self, oid: Oid, start_byte: u64, end_byte: u64) -> Result<()> {
        if self.data_entries.contains_key(&oid) {
            return Err(HelperError::DuplicateEntry(oid));
        }
        if start_byte > end_byte {
            return Err(HelperError::Toc(format!(
                "oid {oid}: start byte {start_byte} is past end byte {end_byte}"
            )));
        }
        self.data_entries.insert(
            oid,
            SegmentDataEntry {
                start_byte,
                end_byte,
            },
        );
        Ok(())
    }

    /// Record `n` bytes for `oid` at the write cursor and advance it.
    pub fn append(&mut self, oid: Oid, n: u64) -> Result<SegmentDataEntry> {
        let start = self.last_byte_read;
        let end = start
            .checked_add(n)
            .ok_or_else(|| HelperError::Toc(format!("oid {oid}: byte offset overflow")))?;
        self.add_entry(oid, start, end)?;
        self.last_byte_read = end;
        Ok(SegmentDataEntry {
            start_byte: start,
            end_byte: end,
        })
    }

    pub fn entry(&self, oid: Oid) -> Result<SegmentDataEntry> {
        self.data_entries
            .get(&oid)
            .copied()
            .ok_or(HelperError::MissingEntry(oid))
    }

    pub fn len(&self) -> usize {
        self.data_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_entries.is_empty()
    }

    /// Write next to `path` under a temporary name, rename into place, then
    /// make the file read-only. A finalized TOC is never replaced.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if path.exists() && is_finalized(path)? {
            return Err(HelperError::Toc(format!(
                "{} is already finalized",
                path.display()
            )));
        }
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let text =
            serde_yaml::to_string(self).map_err(|e| HelperError::Toc(format!("encode: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        let f = tmp.persist(path).map_err(|e| e.error)?;
        f.set_permissions(fs::Permissions::from_mode(FINALIZED_MODE))?;
        debug!(toc = %path.display(), entries = self.len(), "finalized segment TOC");
        Ok(())
    }
}

/// A finalized TOC is one with every write bit cleared.
pub fn is_finalized(path: &Path) -> Result<bool> {
    let md = fs::metadata(path)?;
    Ok(md.permissions().mode() & 0o222 == 0)
}
