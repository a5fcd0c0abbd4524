//! # arqvist - State tracking for sequencing data directories
//!
//! Captures what a directory tree looks like, persists that picture, and
//! later tells you precisely how the live tree (or a copy of it somewhere
//! else) has drifted from it.
//!
//! ## Overview
//!
//! Data from a sequencing run is usually copied, moved and re-permissioned
//! many times between the instrument and the archive. arqvist lets you:
//! - Snapshot a directory: checksums, sizes, permissions, ownership and
//!   timestamps of every entry
//! - Detect corruption, permission drift, and missing or extra files
//! - Verify a relocated copy against the original's snapshot
//! - Keep a history of superseded snapshots
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arqvist::{CompareOptions, TrackerBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Snapshot the run directory; state goes into /data/run42/.arqvist
//! let tracker = TrackerBuilder::new().init("/data/run42")?;
//!
//! // ... files are copied, edited, chmod'ed ...
//!
//! let result = tracker.status(None, CompareOptions::strict())?;
//! for entry in result.changed() {
//!     println!("{}: {}", entry.kind, entry.path);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Verifying a copy
//!
//! ```rust,no_run
//! use arqvist::{CompareOptions, Tracker};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tracker = Tracker::open("/data/run42")?;
//! let result = tracker.status(Some(Path::new("/archive/run42")), CompareOptions::relocation())?;
//! if !result.has_differences() {
//!     println!("copy is complete");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Snapshots
//!
//! A [`Snapshot`] maps relative POSIX paths to [`FileRecord`]s. Symlinks are
//! recorded, never followed. Regular files carry a SHA-256 content hash.
//! Entries that could not be read end up in [`Snapshot::errors`] instead of
//! failing the scan.
//!
//! ### Manifests
//!
//! Snapshots are stored as pretty JSON with deterministic ordering, written
//! atomically. A manifest that fails to parse or violates snapshot
//! invariants is reported as corrupt; there is no partial recovery.
//!
//! ### Diffs
//!
//! [`Differ`] classifies every path as unchanged, modified, added, removed,
//! type-changed, permission-changed or ownership-changed, and lists each
//! differing attribute. Modification times are reported but never decide a
//! classification.
//!
//! ## Module Organization
//!
//! - [`scanner`]: directory walking and hashing
//! - [`manifest`]: snapshot persistence and the marker directory layout
//! - [`diff`]: snapshot comparison
//! - [`summary`]: size, ownership and permission report of a snapshot
//! - [`tracker`]: init/status/update on a tracked directory
//! - [`types`]: records, snapshots, configuration
//! - [`error`]: error types
//! - [`utils`]: hashing and metadata helpers

pub mod diff;
pub mod error;
pub mod manifest;
pub mod scanner;
pub mod summary;
pub mod tracker;
pub mod types;
pub mod utils;

pub use diff::{Attribute, AttributeChange, ChangeKind, CompareOptions, DiffResult, DiffSummary, Differ, RecordDiff};
pub use error::{ArqvistError, Result};
pub use manifest::{Fingerprint, HistoryEntry, ManifestStore};
pub use scanner::Scanner;
pub use summary::{DirectorySummary, ExternalLink, PermissionFlags, SnapshotSummary};
pub use tracker::{Tracker, TrackerBuilder, UpdateOutcome};
pub use types::*;
