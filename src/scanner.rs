//! Directory scanning
//!
//! The [`Scanner`] walks a directory tree without following symlinks, captures
//! an `lstat` view of every entry and hashes regular files on a bounded worker
//! pool. The result is a [`Snapshot`] whose records are keyed, and therefore
//! serialized, in path order.
//!
//! ## Example
//!
//! ```rust,no_run
//! use arqvist::scanner::Scanner;
//!
//! # fn example() -> arqvist::Result<()> {
//! let snapshot = Scanner::new("/data/run42")
//!     .with_hash_workers(2)
//!     .with_exclude_patterns(vec!["**/*.tmp".to_string()])
//!     .scan()?;
//!
//! println!("{} entries, {} unreadable", snapshot.len(), snapshot.errors.len());
//! # Ok(())
//! # }
//! ```
//!
//! Only problems with the root abort a scan. Anything that goes wrong below
//! the root is recorded in [`Snapshot::errors`] and the walk carries on.

use crate::error::{ArqvistError, Result};
use crate::manifest::MARKER_DIR;
use crate::types::{
    EntryKind, EntryType, FileRecord, ProgressCallback, ProgressInfo, ScanError, ScanErrorKind,
    Snapshot,
};
use crate::utils::{self, FileMetadata};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Default number of hashing workers: `min(4, cpu count)`
pub fn default_hash_workers() -> usize {
    num_cpus::get().clamp(1, 4)
}

/// Builder-style scanner for one directory tree
#[derive(Clone)]
pub struct Scanner {
    root: PathBuf,
    hash_workers: usize,
    exclude_patterns: Vec<String>,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("root", &self.root)
            .field("hash_workers", &self.hash_workers)
            .field("exclude_patterns", &self.exclude_patterns)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Entry found by the walk, waiting to be turned into a record
struct PendingEntry {
    relative_path: String,
    path: PathBuf,
    metadata: FileMetadata,
}

impl Scanner {
    /// Create a scanner for `root` with default settings
    ///
    /// Defaults: no exclude patterns, [`default_hash_workers`] workers, no
    /// progress reporting.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hash_workers: default_hash_workers(),
            exclude_patterns: Vec::new(),
            progress: None,
        }
    }

    /// Set the number of hashing workers (minimum 1)
    pub fn with_hash_workers(mut self, workers: usize) -> Self {
        self.hash_workers = workers.max(1);
        self
    }

    /// Set glob patterns for entries to skip
    ///
    /// Patterns use globset syntax and are matched against the `/`-separated
    /// path relative to the root. A matching directory is skipped together
    /// with everything below it.
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    /// Report hashing progress through `callback`
    ///
    /// The callback is invoked from worker threads.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Root directory of this scanner
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the tree and build a snapshot
    ///
    /// # Errors
    ///
    /// - [`ArqvistError::NotFound`] if the root does not exist
    /// - [`ArqvistError::NotADirectory`] if the root is not a directory
    /// - [`ArqvistError::PermissionDenied`] if the root cannot be listed
    /// - [`ArqvistError::InvalidPattern`] if an exclude pattern does not parse
    /// - [`ArqvistError::ThreadPool`] if the hashing pool cannot be started
    pub fn scan(&self) -> Result<Snapshot> {
        let start = Instant::now();
        self.check_root()?;
        let excludes = build_glob_set(&self.exclude_patterns)?;

        info!("Scanning {:?} with {} hash workers", self.root, self.hash_workers);

        let (pending, mut errors) = self.walk(&excludes);
        let results = self.build_records(pending)?;

        let mut snapshot = Snapshot::new(self.root.clone());
        for result in results {
            match result {
                Ok(record) => snapshot.insert(record),
                Err(error) => errors.push(error),
            }
        }
        errors.extend(prune_orphans(&mut snapshot));

        for error in &errors {
            warn!("Could not capture {:?}: {}", error.relative_path, error.message);
        }
        errors.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        snapshot.errors = errors;
        snapshot.created_at = Utc::now();

        debug!(
            "Scanned {} entries ({} files, {}) with {} errors in {:?}",
            snapshot.len(),
            snapshot.file_count(),
            utils::format_bytes(snapshot.total_size()),
            snapshot.errors.len(),
            start.elapsed()
        );

        Ok(snapshot)
    }

    fn check_root(&self) -> Result<()> {
        let metadata = fs::metadata(&self.root).map_err(|e| ArqvistError::from_io(e, &self.root))?;
        if !metadata.is_dir() {
            return Err(ArqvistError::NotADirectory(self.root.clone()));
        }
        fs::read_dir(&self.root).map_err(|e| ArqvistError::from_io(e, &self.root))?;
        Ok(())
    }

    /// Single-threaded, sorted walk collecting entries and walk errors
    fn walk(&self, excludes: &GlobSet) -> (Vec<PendingEntry>, Vec<ScanError>) {
        let root = self.root.as_path();
        let mut pending = Vec::new();
        let mut errors = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !is_excluded(entry, root, excludes));

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    let relative_path = err
                        .path()
                        .map(|p| utils::to_relative_lossy(p, root))
                        .unwrap_or_default();
                    let error = match err.io_error() {
                        Some(io_err) => ScanError::from_io(relative_path, io_err),
                        None => ScanError {
                            relative_path,
                            kind: ScanErrorKind::Io,
                            message: err.to_string(),
                        },
                    };
                    errors.push(error);
                    continue;
                }
            };

            let relative_path = match utils::to_relative_posix(entry.path(), root) {
                Ok(rel) => rel,
                Err(_) => {
                    errors.push(ScanError {
                        relative_path: utils::to_relative_lossy(entry.path(), root),
                        kind: ScanErrorKind::Io,
                        message: "file name is not valid UTF-8".to_string(),
                    });
                    continue;
                }
            };

            match utils::get_file_metadata(entry.path()) {
                Ok(metadata) => {
                    trace!("Found {} {:?}", metadata.entry_type, relative_path);
                    pending.push(PendingEntry {
                        relative_path,
                        path: entry.into_path(),
                        metadata,
                    });
                }
                Err(err) => errors.push(scan_error(relative_path, &err)),
            }
        }

        (pending, errors)
    }

    /// Turn walked entries into records, hashing files on the worker pool
    fn build_records(&self, pending: Vec<PendingEntry>) -> Result<Vec<std::result::Result<FileRecord, ScanError>>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.hash_workers)
            .thread_name(|i| format!("arqvist-hash-{}", i))
            .build()?;

        let total = pending.len();
        let processed = AtomicUsize::new(0);
        let bytes_processed = AtomicU64::new(0);

        let results = pool.install(|| {
            pending
                .into_par_iter()
                .map(|entry| {
                    let result = build_record(entry);

                    if let Some(callback) = &self.progress {
                        let bytes = match &result {
                            Ok(record) if record.entry_type() == EntryType::File => record.size,
                            _ => 0,
                        };
                        let info = ProgressInfo {
                            operation: "Hashing".to_string(),
                            current_item: Some(match &result {
                                Ok(record) => record.relative_path.clone(),
                                Err(error) => error.relative_path.clone(),
                            }),
                            processed: processed.fetch_add(1, Ordering::Relaxed) + 1,
                            total: Some(total),
                            bytes_processed: bytes_processed.fetch_add(bytes, Ordering::Relaxed) + bytes,
                        };
                        callback(info);
                    }

                    result
                })
                .collect()
        });

        Ok(results)
    }
}

fn build_record(entry: PendingEntry) -> std::result::Result<FileRecord, ScanError> {
    let PendingEntry {
        relative_path,
        path,
        metadata,
    } = entry;

    let (kind, size) = match metadata.entry_type {
        EntryType::File => match utils::hash_file_content(&path) {
            Ok(content_hash) => (EntryKind::File { content_hash }, metadata.size),
            Err(err) => return Err(scan_error(relative_path, &err)),
        },
        EntryType::Directory => (EntryKind::Directory, 0),
        EntryType::Symlink => match utils::read_symlink_target(&path) {
            Ok(target) => (EntryKind::Symlink { target }, metadata.size),
            Err(err) => return Err(scan_error(relative_path, &err)),
        },
        EntryType::Other => (EntryKind::Other, metadata.size),
    };

    Ok(FileRecord {
        relative_path,
        kind,
        size,
        permission_bits: metadata.permissions,
        owner: metadata.owner,
        group: metadata.group,
        modified_time: DateTime::<Utc>::from(metadata.modified),
    })
}

fn scan_error(relative_path: String, err: &ArqvistError) -> ScanError {
    match err {
        ArqvistError::Io(io_err) => ScanError::from_io(relative_path, io_err),
        ArqvistError::PermissionDenied { .. } => ScanError {
            relative_path,
            kind: ScanErrorKind::PermissionDenied,
            message: err.to_string(),
        },
        other => ScanError {
            relative_path,
            kind: ScanErrorKind::Io,
            message: other.to_string(),
        },
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ArqvistError::InvalidPattern(format!("{}: {}", pattern, e)))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn is_excluded(entry: &walkdir::DirEntry, root: &Path, excludes: &GlobSet) -> bool {
    if entry.depth() == 1 && entry.file_name() == MARKER_DIR {
        return true;
    }
    if excludes.is_empty() {
        return false;
    }
    match utils::to_relative_posix(entry.path(), root) {
        Ok(rel) => excludes.is_match(rel.as_str()),
        Err(_) => false,
    }
}

/// Drop records whose parent directory was not captured
///
/// Keeps the parent-present invariant when a directory itself failed to
/// `lstat` but its children did not.
fn prune_orphans(snapshot: &mut Snapshot) -> Vec<ScanError> {
    let mut removed: HashSet<String> = HashSet::new();

    // Parents sort before their children, so one ordered pass suffices.
    for (path, record) in &snapshot.records {
        if let Some(parent) = record.parent_path() {
            let parent_ok = !removed.contains(parent)
                && matches!(snapshot.records.get(parent), Some(p) if p.entry_type() == EntryType::Directory);
            if !parent_ok {
                removed.insert(path.clone());
            }
        }
    }

    let mut errors: Vec<ScanError> = removed
        .into_iter()
        .map(|path| {
            snapshot.records.remove(&path);
            ScanError {
                relative_path: path,
                kind: ScanErrorKind::Io,
                message: "parent directory could not be captured".to_string(),
            }
        })
        .collect();
    errors.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    errors
}
