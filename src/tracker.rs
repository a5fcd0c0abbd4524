//! Tracked directories
//!
//! [`Tracker`] ties the scanner, the manifest store and the differ to one
//! directory that carries a `.arqvist` marker. All state lives in the marker
//! directory; there is no global notion of a current tracked directory. Use
//! [`Tracker::discover`] to find the tracked root above a working directory.
//!
//! ```rust,no_run
//! use arqvist::{CompareOptions, Tracker, TrackerBuilder};
//!
//! # fn example() -> arqvist::Result<()> {
//! let tracker = TrackerBuilder::new()
//!     .exclude_patterns(vec!["**/*.tmp".to_string()])
//!     .hash_workers(2)
//!     .init("/data/run42")?;
//!
//! // Later, possibly from another process
//! let tracker = Tracker::discover("/data/run42/fastqs")?;
//! let result = tracker.status(None, CompareOptions::strict())?;
//! println!("{} paths changed", result.summary().total_changed());
//! # Ok(())
//! # }
//! ```

use crate::diff::{CompareOptions, DiffResult, Differ};
use crate::error::{ArqvistError, Result};
use crate::manifest::{HistoryEntry, ManifestStore, MARKER_DIR};
use crate::scanner::{default_hash_workers, Scanner};
use crate::types::{ProgressCallback, Snapshot, TrackerConfig, MANIFEST_FORMAT_VERSION};
use chrono::Utc;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// A directory under arqvist tracking
#[derive(Clone)]
pub struct Tracker {
    root: PathBuf,
    store: ManifestStore,
    config: TrackerConfig,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("root", &self.root)
            .field("store", &self.store)
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Result of [`Tracker::update`]
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Fresh snapshot of the tree
    pub snapshot: Snapshot,
    /// What changed relative to the previous manifest (strict comparison)
    pub changes: DiffResult,
    /// Whether the manifest was replaced; `false` when already up to date
    pub superseded: bool,
}

impl Tracker {
    /// Open an already tracked directory
    ///
    /// # Errors
    ///
    /// - [`ArqvistError::NotFound`] if `root` does not exist
    /// - [`ArqvistError::NotInitialized`] if `root` has no marker directory
    /// - [`ArqvistError::InvalidConfiguration`] if the stored config is unreadable
    #[instrument(skip_all, fields(root = ?root.as_ref()))]
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = canonical_dir(root.as_ref())?;
        let store = ManifestStore::open(&root)?;
        let config = store.read_config()?;
        debug!("Opened tracked directory {:?}", root);

        Ok(Self {
            root,
            store,
            config,
            progress: None,
        })
    }

    /// Find the tracked directory containing `start`
    ///
    /// Walks from `start` towards the filesystem root and opens the first
    /// directory that carries a marker directory.
    ///
    /// # Errors
    ///
    /// - [`ArqvistError::NotInitialized`] if no ancestor is tracked
    pub fn discover(start: impl AsRef<Path>) -> Result<Self> {
        let start = canonical_dir(start.as_ref())?;
        for candidate in start.ancestors() {
            if candidate.join(MARKER_DIR).is_dir() {
                debug!("Discovered tracked directory {:?} from {:?}", candidate, start);
                return Self::open(candidate);
            }
        }
        Err(ArqvistError::NotInitialized(start))
    }

    /// Report scan progress through `callback`
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Tracked root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stored configuration
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Marker directory layout
    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Scanner configured from the stored config
    pub fn scanner(&self, root: impl Into<PathBuf>) -> Scanner {
        build_scanner(root.into(), &self.config.exclude_patterns, self.config.hash_workers, &self.progress)
    }

    /// Load the stored baseline snapshot
    pub fn baseline(&self) -> Result<Snapshot> {
        self.store.load()
    }

    /// Superseded manifests, oldest first
    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.store.history()
    }

    /// Compare `target` (or the tracked root) against the baseline
    ///
    /// Passing a target compares a relocated copy against this directory's
    /// baseline; choose [`CompareOptions::relocation`] when the copy lives on
    /// a filesystem with different ownership.
    ///
    /// # Errors
    ///
    /// - [`ArqvistError::ManifestNotFound`] / [`ArqvistError::CorruptManifest`]
    ///   if the baseline cannot be loaded
    /// - any root error from [`Scanner::scan`] for the target
    #[instrument(skip(self), fields(root = ?self.root))]
    pub fn status(&self, target: Option<&Path>, options: CompareOptions) -> Result<DiffResult> {
        let baseline = self.baseline()?;
        let target_root = target.map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        let current = self.scanner(target_root).scan()?;

        Ok(Differ::new(options).compare(&baseline, &current))
    }

    /// Rescan the tree and supersede the manifest if anything changed
    ///
    /// The previous manifest is archived under `history/`. The replace is
    /// guarded by the fingerprint of the manifest loaded at the start, so a
    /// concurrent update is reported instead of silently overwritten.
    ///
    /// # Errors
    ///
    /// - [`ArqvistError::ConcurrentWriteConflict`] if the manifest changed
    ///   while scanning
    #[instrument(skip(self), fields(root = ?self.root))]
    pub fn update(&self) -> Result<UpdateOutcome> {
        let (baseline, fingerprint) = self.store.load_with_fingerprint()?;
        let snapshot = self.scanner(self.root.clone()).scan()?;
        let changes = Differ::new(CompareOptions::strict()).compare(&baseline, &snapshot);

        if !changes.has_differences() && snapshot.errors == baseline.errors {
            info!("Manifest for {:?} is already up to date", self.root);
            return Ok(UpdateOutcome {
                snapshot,
                changes,
                superseded: false,
            });
        }

        self.store.supersede(&snapshot, &fingerprint)?;
        info!(
            "Updated manifest for {:?}: {} paths changed",
            self.root,
            changes.summary().total_changed()
        );

        Ok(UpdateOutcome {
            snapshot,
            changes,
            superseded: true,
        })
    }
}

/// Builder for tracking a new directory
#[derive(Clone)]
pub struct TrackerBuilder {
    exclude_patterns: Vec<String>,
    hash_workers: usize,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for TrackerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerBuilder")
            .field("exclude_patterns", &self.exclude_patterns)
            .field("hash_workers", &self.hash_workers)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl TrackerBuilder {
    /// Builder with no exclude patterns and the default worker count
    pub fn new() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            hash_workers: default_hash_workers(),
            progress: None,
        }
    }

    /// Glob patterns excluded from every scan of this directory
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    /// Number of hashing workers (minimum 1)
    pub fn hash_workers(mut self, workers: usize) -> Self {
        self.hash_workers = workers.max(1);
        self
    }

    /// Report progress of the initial scan
    pub fn progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Start tracking `root`
    ///
    /// Scans the tree, then creates the marker directory with the config and
    /// the first manifest. Nothing is written if the scan fails.
    ///
    /// # Errors
    ///
    /// - [`ArqvistError::AlreadyInitialized`] if `root` is already tracked
    /// - [`ArqvistError::NotFound`] / [`ArqvistError::NotADirectory`] /
    ///   [`ArqvistError::PermissionDenied`] for an unusable root
    /// - [`ArqvistError::InvalidPattern`] for a bad exclude pattern
    #[instrument(skip_all, fields(root = ?root.as_ref()))]
    pub fn init(self, root: impl AsRef<Path>) -> Result<Tracker> {
        let root = canonical_dir(root.as_ref())?;
        if root.join(MARKER_DIR).exists() {
            return Err(ArqvistError::AlreadyInitialized(root));
        }

        let snapshot =
            build_scanner(root.clone(), &self.exclude_patterns, self.hash_workers, &self.progress).scan()?;

        let config = TrackerConfig {
            format_version: MANIFEST_FORMAT_VERSION,
            arqvist_version: env!("CARGO_PKG_VERSION").to_string(),
            root_path: root.clone(),
            created_at: Utc::now(),
            exclude_patterns: self.exclude_patterns,
            hash_workers: self.hash_workers,
        };

        let store = ManifestStore::init(&root, &config)?;
        if let Err(e) = store.save_initial(&snapshot) {
            warn!("Initial manifest could not be saved, removing {:?}", store.marker_dir());
            fs::remove_dir_all(store.marker_dir()).ok();
            return Err(e);
        }

        info!(
            "Tracking {:?}: {} entries, {} unreadable",
            root,
            snapshot.len(),
            snapshot.errors.len()
        );

        Ok(Tracker {
            root,
            store,
            config,
            progress: self.progress,
        })
    }
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_scanner(
    root: PathBuf,
    exclude_patterns: &[String],
    hash_workers: usize,
    progress: &Option<ProgressCallback>,
) -> Scanner {
    let scanner = Scanner::new(root)
        .with_exclude_patterns(exclude_patterns.to_vec())
        .with_hash_workers(hash_workers);
    match progress {
        Some(callback) => scanner.with_progress(callback.clone()),
        None => scanner,
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf> {
    let canonical = fs::canonicalize(path).map_err(|e| ArqvistError::from_io(e, path))?;
    if !canonical.is_dir() {
        return Err(ArqvistError::NotADirectory(canonical));
    }
    Ok(canonical)
}
