//! Snapshot persistence
//!
//! A snapshot is stored as a pretty-printed JSON manifest. Records live in a
//! `BTreeMap` and struct fields serialize in declaration order, so the same
//! snapshot always produces the same bytes and two manifests can be compared
//! with an ordinary text diff.
//!
//! Writes go through a temporary file in the destination directory that is
//! atomically persisted over the target. A reader therefore sees either the
//! old manifest or the new one, never a truncated mix.
//!
//! [`ManifestStore`] owns the marker directory of a tracked tree:
//!
//! ```text
//! <root>/.arqvist/
//! ├── config.json
//! ├── manifest.json
//! └── history/
//!     └── 20261018T091502.123456789Z.json
//! ```

use crate::error::{ArqvistError, Result};
use crate::types::{Snapshot, TrackerConfig, MANIFEST_FORMAT_VERSION};
use crate::utils;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Name of the marker directory at the root of a tracked tree
pub const MARKER_DIR: &str = ".arqvist";
/// Tracker configuration file inside the marker directory
pub const CONFIG_FILE: &str = "config.json";
/// Current manifest inside the marker directory
pub const MANIFEST_FILE: &str = "manifest.json";
/// Directory of superseded manifests inside the marker directory
pub const HISTORY_DIR: &str = "history";

/// Timestamp format used to name history entries; sorts chronologically
const HISTORY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.9fZ";

/// SHA-256 of a manifest's bytes as written or read
///
/// Used to notice that somebody else replaced the manifest between a load and
/// the following save.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of raw manifest bytes
    pub fn of(bytes: &[u8]) -> Self {
        Fingerprint(utils::hash_data(bytes))
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize a snapshot to its canonical manifest bytes
pub fn to_bytes(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(snapshot)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Save a snapshot to `path`, replacing any existing manifest
///
/// Returns the fingerprint of the written bytes.
///
/// # Errors
///
/// - [`ArqvistError::Json`] if serialization fails
/// - [`ArqvistError::Io`] if the temporary file cannot be written or persisted
pub fn save(snapshot: &Snapshot, path: &Path) -> Result<Fingerprint> {
    let bytes = to_bytes(snapshot)?;
    atomic_write(path, &bytes)?;
    debug!("Saved manifest {:?} ({} records)", path, snapshot.len());
    Ok(Fingerprint::of(&bytes))
}

/// Load a snapshot from `path`
///
/// # Errors
///
/// - [`ArqvistError::ManifestNotFound`] if there is no file at `path`
/// - [`ArqvistError::CorruptManifest`] if the file does not deserialize or
///   breaks snapshot invariants
pub fn load(path: &Path) -> Result<Snapshot> {
    load_with_fingerprint(path).map(|(snapshot, _)| snapshot)
}

/// Load a snapshot together with the fingerprint of the bytes read
pub fn load_with_fingerprint(path: &Path) -> Result<(Snapshot, Fingerprint)> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ArqvistError::ManifestNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(ArqvistError::from_io(e, path)),
    };

    let snapshot = parse(path, &bytes)?;
    Ok((snapshot, Fingerprint::of(&bytes)))
}

fn parse(path: &Path, bytes: &[u8]) -> Result<Snapshot> {
    let snapshot: Snapshot =
        serde_json::from_slice(bytes).map_err(|e| ArqvistError::corrupt(path, e.to_string()))?;

    if snapshot.format_version != MANIFEST_FORMAT_VERSION {
        return Err(ArqvistError::corrupt(
            path,
            format!("unsupported format version {}", snapshot.format_version),
        ));
    }
    snapshot
        .validate()
        .map_err(|message| ArqvistError::corrupt(path, message))?;

    Ok(snapshot)
}

/// Save only if the manifest on disk is still the one the caller loaded
///
/// `expected` is the fingerprint from the caller's load, or `None` if the
/// caller expects no manifest to exist yet. The destination is re-read just
/// before the replace.
///
/// # Errors
///
/// - [`ArqvistError::ConcurrentWriteConflict`] if the manifest on disk does
///   not match `expected`; nothing is written in that case
pub fn save_if_unchanged(
    snapshot: &Snapshot,
    path: &Path,
    expected: Option<&Fingerprint>,
) -> Result<Fingerprint> {
    let current = current_fingerprint(path)?;
    if current.as_ref() != expected {
        warn!(
            "Manifest {:?} changed on disk (expected {:?}, found {:?})",
            path,
            expected.map(Fingerprint::as_str),
            current.as_ref().map(Fingerprint::as_str)
        );
        return Err(ArqvistError::ConcurrentWriteConflict(path.to_path_buf()));
    }
    save(snapshot, path)
}

fn current_fingerprint(path: &Path) -> Result<Option<Fingerprint>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(Fingerprint::of(&bytes))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ArqvistError::from_io(e, path)),
    }
}

/// Write `content` to `path` atomically
///
/// The data goes to a temporary file next to `path`, is synced, and then
/// renamed over the destination.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| ArqvistError::Io(e.error))?;
    Ok(())
}

/// A superseded manifest kept under `history/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Location of the archived manifest
    pub path: PathBuf,
    /// Creation time of the archived snapshot, from the file name
    pub label: String,
}

impl HistoryEntry {
    /// Load the archived snapshot
    pub fn load(&self) -> Result<Snapshot> {
        load(&self.path)
    }
}

/// Layout of the marker directory of one tracked tree
#[derive(Debug, Clone)]
pub struct ManifestStore {
    root: PathBuf,
    marker: PathBuf,
}

impl ManifestStore {
    /// Create the marker directory and write the initial configuration
    ///
    /// # Errors
    ///
    /// - [`ArqvistError::AlreadyInitialized`] if the marker directory exists
    /// - [`ArqvistError::Io`] if the directories or config cannot be written
    pub fn init(root: &Path, config: &TrackerConfig) -> Result<Self> {
        let store = Self::at(root);
        if store.marker.exists() {
            return Err(ArqvistError::AlreadyInitialized(root.to_path_buf()));
        }

        fs::create_dir_all(store.history_dir())
            .map_err(|e| ArqvistError::from_io(e, &store.marker))?;
        store.write_config(config)?;

        info!("Initialized marker directory at {:?}", store.marker);
        Ok(store)
    }

    /// Open the marker directory of an already tracked tree
    ///
    /// # Errors
    ///
    /// - [`ArqvistError::NotInitialized`] if there is no marker directory
    pub fn open(root: &Path) -> Result<Self> {
        let store = Self::at(root);
        if !store.marker.is_dir() {
            return Err(ArqvistError::NotInitialized(root.to_path_buf()));
        }
        Ok(store)
    }

    fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            marker: root.join(MARKER_DIR),
        }
    }

    /// Tracked root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `.arqvist` directory
    pub fn marker_dir(&self) -> &Path {
        &self.marker
    }

    /// Path of the current manifest
    pub fn manifest_path(&self) -> PathBuf {
        self.marker.join(MANIFEST_FILE)
    }

    /// Path of the configuration file
    pub fn config_path(&self) -> PathBuf {
        self.marker.join(CONFIG_FILE)
    }

    /// Directory holding superseded manifests
    pub fn history_dir(&self) -> PathBuf {
        self.marker.join(HISTORY_DIR)
    }

    /// Read the tracker configuration
    ///
    /// # Errors
    ///
    /// - [`ArqvistError::NotInitialized`] if the config file is missing
    /// - [`ArqvistError::InvalidConfiguration`] if it cannot be parsed
    pub fn read_config(&self) -> Result<TrackerConfig> {
        let path = self.config_path();
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ArqvistError::NotInitialized(self.root.clone()))
            }
            Err(e) => return Err(ArqvistError::from_io(e, &path)),
        };
        serde_json::from_str(&json)
            .map_err(|e| ArqvistError::InvalidConfiguration(format!("{:?}: {}", path, e)))
    }

    /// Write the tracker configuration
    pub fn write_config(&self, config: &TrackerConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        atomic_write(&self.config_path(), json.as_bytes())
    }

    /// Load the current manifest
    pub fn load(&self) -> Result<Snapshot> {
        load(&self.manifest_path())
    }

    /// Load the current manifest and its fingerprint
    pub fn load_with_fingerprint(&self) -> Result<(Snapshot, Fingerprint)> {
        load_with_fingerprint(&self.manifest_path())
    }

    /// Save the first manifest; fails if one already exists
    pub fn save_initial(&self, snapshot: &Snapshot) -> Result<Fingerprint> {
        save_if_unchanged(snapshot, &self.manifest_path(), None)
    }

    /// Archive the current manifest into `history/` and replace it
    ///
    /// `expected` must be the fingerprint of the manifest being replaced.
    ///
    /// # Errors
    ///
    /// - [`ArqvistError::ConcurrentWriteConflict`] if the current manifest is
    ///   not the one identified by `expected`
    /// - [`ArqvistError::CorruptManifest`] if the current manifest is unreadable
    pub fn supersede(&self, snapshot: &Snapshot, expected: &Fingerprint) -> Result<Fingerprint> {
        let manifest_path = self.manifest_path();
        let current = match fs::read(&manifest_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ArqvistError::ConcurrentWriteConflict(manifest_path))
            }
            Err(e) => return Err(ArqvistError::from_io(e, &manifest_path)),
        };
        if &Fingerprint::of(&current) != expected {
            return Err(ArqvistError::ConcurrentWriteConflict(manifest_path));
        }

        let previous = parse(&manifest_path, &current)?;
        let archived = self.history_path(previous.created_at);
        fs::create_dir_all(self.history_dir())?;
        atomic_write(&archived, &current)?;
        debug!("Archived manifest to {:?}", archived);

        let fingerprint = save_if_unchanged(snapshot, &manifest_path, Some(expected))?;
        info!(
            "Superseded manifest from {} with {} records",
            previous.created_at.to_rfc3339(),
            snapshot.len()
        );
        Ok(fingerprint)
    }

    fn history_path(&self, created_at: DateTime<Utc>) -> PathBuf {
        let label = created_at.format(HISTORY_TIMESTAMP_FORMAT).to_string();
        let mut path = self.history_dir().join(format!("{}.json", label));
        let mut n = 1;
        while path.exists() {
            path = self.history_dir().join(format!("{}-{}.json", label, n));
            n += 1;
        }
        path
    }

    /// Superseded manifests, oldest first
    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        let dir = self.history_dir();
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArqvistError::from_io(e, &dir)),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let label = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            entries.push(HistoryEntry { path, label });
        }
        entries.sort_by(|a, b| history_order(&a.label).cmp(&history_order(&b.label)));
        Ok(entries)
    }
}

/// Sort key for a history label: timestamp, then numeric collision suffix
fn history_order(label: &str) -> (&str, u64) {
    match label.rsplit_once('-') {
        Some((stamp, suffix)) if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) => {
            (stamp, suffix.parse().unwrap_or(u64::MAX))
        }
        _ => (label, 0),
    }
}
