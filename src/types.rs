//! Core data types used throughout arqvist
//!
//! ## Overview
//!
//! - **Directory state**: [`FileRecord`], [`EntryKind`], [`Snapshot`], the
//!   captured properties of one tree at one point in time
//! - **Partial failures**: [`ScanError`], entries a scan could not capture
//! - **Configuration**: [`TrackerConfig`], persisted next to the manifest
//! - **Progress**: [`ProgressInfo`] for long-running scans
//!
//! ## Examples
//!
//! ```rust
//! use arqvist::types::{EntryKind, EntryType, FileRecord};
//! use chrono::Utc;
//!
//! let record = FileRecord {
//!     relative_path: "fastqs/PJB_S1_R1.fastq".to_string(),
//!     kind: EntryKind::File { content_hash: "ab12...".to_string() },
//!     size: 1024,
//!     permission_bits: 0o644,
//!     owner: 1000,
//!     group: 1000,
//!     modified_time: Utc::now(),
//! };
//! assert_eq!(record.entry_type(), EntryType::File);
//! assert_eq!(record.parent_path(), Some("fastqs"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Version of the on-disk manifest format
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Variant tag of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link (never followed)
    Symlink,
    /// Fifo, socket or device node
    Other,
}

impl EntryType {
    /// Short lowercase name, as used in manifests and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::File => "file",
            EntryType::Directory => "directory",
            EntryType::Symlink => "symlink",
            EntryType::Other => "other",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific payload of a [`FileRecord`]
///
/// Only regular files carry a content hash. For everything else the hash is
/// not applicable rather than unknown, so there is no field for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file with its SHA-256 content digest (hex)
    File {
        /// SHA-256 of the file contents
        content_hash: String,
    },
    /// Directory
    Directory,
    /// Symbolic link with its literal, unresolved target
    Symlink {
        /// Link target exactly as stored in the link
        target: String,
    },
    /// Anything else
    Other,
}

impl EntryKind {
    /// The variant tag
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryKind::File { .. } => EntryType::File,
            EntryKind::Directory => EntryType::Directory,
            EntryKind::Symlink { .. } => EntryType::Symlink,
            EntryKind::Other => EntryType::Other,
        }
    }
}

/// Captured properties of one filesystem entry
///
/// `modified_time` is recorded for reporting but never decides equality:
/// content is compared by hash, so a `touch` without a write is not a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// POSIX-style path relative to the snapshot root
    pub relative_path: String,
    /// Entry type and its type-specific data
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Mode bits (`st_mode & 0o7777`)
    pub permission_bits: u32,
    /// Numeric owner id
    pub owner: u32,
    /// Numeric group id
    pub group: u32,
    /// Last modification time, nanosecond precision
    pub modified_time: DateTime<Utc>,
}

impl FileRecord {
    /// Entry type of this record
    pub fn entry_type(&self) -> EntryType {
        self.kind.entry_type()
    }

    /// Content hash, present only for regular files
    pub fn content_hash(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::File { content_hash } => Some(content_hash),
            _ => None,
        }
    }

    /// Symlink target, present only for symlinks
    pub fn symlink_target(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Symlink { target } => Some(target),
            _ => None,
        }
    }

    /// Relative path of the parent directory, `None` for top-level entries
    pub fn parent_path(&self) -> Option<&str> {
        self.relative_path.rsplit_once('/').map(|(parent, _)| parent)
    }

    /// Permission bits rendered as a four-digit octal string
    pub fn mode_string(&self) -> String {
        format!("{:04o}", self.permission_bits)
    }

    /// Equality for diffing purposes
    ///
    /// Every attribute except `modified_time` has to match. When a content
    /// hash is available it decides content equality; otherwise type, mode,
    /// ownership, size and (for symlinks) the link target are compared.
    pub fn matches(&self, other: &FileRecord) -> bool {
        self.relative_path == other.relative_path
            && self.kind == other.kind
            && self.size == other.size
            && self.permission_bits == other.permission_bits
            && self.owner == other.owner
            && self.group == other.group
    }
}

/// Why an entry could not be captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanErrorKind {
    /// Read or traversal refused by the OS
    PermissionDenied,
    /// Any other I/O failure (vanished entry, bad path, ...)
    Io,
}

impl fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanErrorKind::PermissionDenied => f.write_str("permission denied"),
            ScanErrorKind::Io => f.write_str("i/o error"),
        }
    }
}

/// Per-entry failure recorded during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    /// Path of the failing entry relative to the scan root
    pub relative_path: String,
    /// Classification
    pub kind: ScanErrorKind,
    /// Underlying error message
    pub message: String,
}

impl ScanError {
    /// Classify an I/O error for `relative_path`
    pub fn from_io(relative_path: impl Into<String>, err: &std::io::Error) -> Self {
        let kind = if err.kind() == std::io::ErrorKind::PermissionDenied {
            ScanErrorKind::PermissionDenied
        } else {
            ScanErrorKind::Io
        };
        Self {
            relative_path: relative_path.into(),
            kind,
            message: err.to_string(),
        }
    }
}

/// Point-in-time record of a directory tree
///
/// Records are keyed by relative path in a `BTreeMap` so iteration, and
/// therefore serialization, is always in lexicographic path order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Manifest format version
    pub format_version: u32,
    /// Directory the snapshot was taken against (informational)
    pub root_path: PathBuf,
    /// When the scan finished
    pub created_at: DateTime<Utc>,
    /// Host that performed the scan (informational)
    pub host: String,
    /// Captured entries keyed by relative path
    pub records: BTreeMap<String, FileRecord>,
    /// Entries that could not be captured
    pub errors: Vec<ScanError>,
}

impl Snapshot {
    /// Create an empty snapshot for `root_path`
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            root_path,
            created_at: Utc::now(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            records: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Insert a record, replacing any previous one at the same path
    pub fn insert(&mut self, record: FileRecord) {
        self.records.insert(record.relative_path.clone(), record);
    }

    /// Look up a record by relative path
    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.records.get(relative_path)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of regular files
    pub fn file_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.entry_type() == EntryType::File)
            .count()
    }

    /// Total size of regular files in bytes
    pub fn total_size(&self) -> u64 {
        self.records
            .values()
            .filter(|r| r.entry_type() == EntryType::File)
            .map(|r| r.size)
            .sum()
    }

    /// Check the structural invariants of a snapshot
    ///
    /// Keys must equal each record's `relative_path`, paths must be
    /// normalised relative POSIX paths, and every non-top-level record must
    /// have its parent directory present as a directory record.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (key, record) in &self.records {
            if key != &record.relative_path {
                return Err(format!("key {:?} does not match record path {:?}", key, record.relative_path));
            }
            if !is_normal_relative_path(key) {
                return Err(format!("path {:?} is not a normalised relative path", key));
            }
            if let Some(parent) = record.parent_path() {
                match self.records.get(parent) {
                    Some(p) if p.entry_type() == EntryType::Directory => {}
                    Some(_) => return Err(format!("parent of {:?} is not a directory", key)),
                    None => return Err(format!("parent of {:?} is missing", key)),
                }
            }
        }
        Ok(())
    }
}

/// Whether `path` is a non-empty relative POSIX path with no `.`/`..`/empty components
pub(crate) fn is_normal_relative_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('/')
            .all(|c| !c.is_empty() && c != "." && c != "..")
}

/// Configuration for a tracked directory
///
/// Persisted as `config.json` inside the marker directory and re-read on
/// every invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Version of the marker directory layout
    pub format_version: u32,
    /// arqvist version that created this config
    pub arqvist_version: String,
    /// Tracked directory
    pub root_path: PathBuf,
    /// When tracking started
    pub created_at: DateTime<Utc>,
    /// Glob patterns (relative paths) excluded from scans
    pub exclude_patterns: Vec<String>,
    /// Number of hashing workers
    pub hash_workers: usize,
}

/// Progress callback for long-running operations
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: String,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far
    pub processed: usize,
    /// Total items to process (if known)
    pub total: Option<usize>,
    /// Bytes hashed so far
    pub bytes_processed: u64,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some((self.processed as f32 / total as f32) * 100.0),
            _ => None,
        }
    }
}
