//! Record-level comparison of two snapshots
//!
//! ## Overview
//!
//! [`Differ::compare`] merges the record maps of a baseline and a target
//! snapshot by path. Every path in the union of the two keysets yields exactly
//! one [`RecordDiff`]. Paths present on both sides get a single primary
//! classification, chosen by fixed priority:
//!
//! 1. entry type differs: [`ChangeKind::TypeChanged`]
//! 2. content hash, symlink target or size differs: [`ChangeKind::Modified`]
//! 3. permission bits differ: [`ChangeKind::PermissionChanged`]
//! 4. owner or group differs: [`ChangeKind::OwnershipChanged`]
//! 5. otherwise: [`ChangeKind::Unchanged`]
//!
//! Every differing attribute is also listed in [`RecordDiff::changes`]. The
//! modification time appears there for information but never affects the
//! classification.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use arqvist::diff::{CompareOptions, Differ};
//! use arqvist::scanner::Scanner;
//!
//! # fn example() -> arqvist::Result<()> {
//! let baseline = Scanner::new("/data/run42").scan()?;
//! let copy = Scanner::new("/archive/run42").scan()?;
//!
//! let result = Differ::new(CompareOptions::relocation()).compare(&baseline, &copy);
//! for entry in result.changed() {
//!     println!("{}: {}", entry.kind, entry.path);
//! }
//! # Ok(())
//! # }
//! ```

use crate::types::{FileRecord, ScanError, Snapshot};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Primary classification of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    /// Same on both sides (ignoring mtime)
    Unchanged,
    /// Content, symlink target or size differs
    Modified,
    /// Only in the target
    Added,
    /// Only in the baseline
    Removed,
    /// Entry type differs
    TypeChanged,
    /// Only permission bits differ
    PermissionChanged,
    /// Only owner and/or group differ
    OwnershipChanged,
}

impl ChangeKind {
    /// Report name of this classification
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Unchanged => "unchanged",
            ChangeKind::Modified => "modified",
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::TypeChanged => "type-changed",
            ChangeKind::PermissionChanged => "permission-changed",
            ChangeKind::OwnershipChanged => "ownership-changed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute of a record that can differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    /// Entry type
    Type,
    /// Content hash
    Content,
    /// Size in bytes
    Size,
    /// Symlink target
    Target,
    /// Permission bits
    Mode,
    /// Owner id
    Owner,
    /// Group id
    Group,
    /// Modification time (informational)
    Mtime,
}

impl Attribute {
    /// Short name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Type => "type",
            Attribute::Content => "content",
            Attribute::Size => "size",
            Attribute::Target => "target",
            Attribute::Mode => "mode",
            Attribute::Owner => "owner",
            Attribute::Group => "group",
            Attribute::Mtime => "mtime",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One differing attribute with both rendered values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Which attribute
    pub attribute: Attribute,
    /// Value in the baseline
    pub baseline: String,
    /// Value in the target
    pub target: String,
}

/// Outcome for one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDiff {
    /// Relative path
    pub path: String,
    /// Primary classification
    pub kind: ChangeKind,
    /// Every differing attribute, including informational ones
    pub changes: Vec<AttributeChange>,
    /// Path (or an ancestor) could not be read on the side that lacks it
    ///
    /// Only set for [`ChangeKind::Removed`] and [`ChangeKind::Added`]: the
    /// entry may well exist there, the scan just could not capture it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unreadable: bool,
}

impl RecordDiff {
    /// Look up the change for `attribute`, if it differs
    pub fn change(&self, attribute: Attribute) -> Option<&AttributeChange> {
        self.changes.iter().find(|c| c.attribute == attribute)
    }
}

/// Counts per classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Unchanged paths
    pub unchanged: usize,
    /// Modified paths
    pub modified: usize,
    /// Added paths
    pub added: usize,
    /// Removed paths
    pub removed: usize,
    /// Paths whose type changed
    pub type_changed: usize,
    /// Paths with permission drift only
    pub permission_changed: usize,
    /// Paths with ownership drift only
    pub ownership_changed: usize,
    /// Added or removed paths that were unreadable on the other side
    pub unreadable: usize,
}

impl DiffSummary {
    /// Number of paths that are not unchanged
    pub fn total_changed(&self) -> usize {
        self.modified
            + self.added
            + self.removed
            + self.type_changed
            + self.permission_changed
            + self.ownership_changed
    }

    fn record(&mut self, entry: &RecordDiff) {
        if entry.unreadable {
            self.unreadable += 1;
        }
        match entry.kind {
            ChangeKind::Unchanged => self.unchanged += 1,
            ChangeKind::Modified => self.modified += 1,
            ChangeKind::Added => self.added += 1,
            ChangeKind::Removed => self.removed += 1,
            ChangeKind::TypeChanged => self.type_changed += 1,
            ChangeKind::PermissionChanged => self.permission_changed += 1,
            ChangeKind::OwnershipChanged => self.ownership_changed += 1,
        }
    }
}

/// Result of comparing two snapshots
///
/// Owned by the caller and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Root the baseline was taken from
    pub baseline_root: PathBuf,
    /// Root the target was taken from
    pub target_root: PathBuf,
    /// One entry per path in the union of both snapshots, sorted by path
    pub entries: Vec<RecordDiff>,
    /// Entries the target scan could not capture
    pub target_errors: Vec<ScanError>,
}

impl DiffResult {
    /// Whether any path is not unchanged
    pub fn has_differences(&self) -> bool {
        self.entries.iter().any(|e| e.kind != ChangeKind::Unchanged)
    }

    /// Entries that are not unchanged
    pub fn changed(&self) -> impl Iterator<Item = &RecordDiff> {
        self.entries.iter().filter(|e| e.kind != ChangeKind::Unchanged)
    }

    /// Entry for `path`
    pub fn get(&self, path: &str) -> Option<&RecordDiff> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Counts per classification
    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for entry in &self.entries {
            summary.record(entry);
        }
        summary
    }
}

/// Which attributes to leave out of the comparison
///
/// Ignored attributes are neither classified nor listed. Root paths are never
/// compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Ignore owner ids
    pub ignore_owner: bool,
    /// Ignore group ids
    pub ignore_group: bool,
    /// Ignore permission bits
    pub ignore_permissions: bool,
}

impl CompareOptions {
    /// Compare every attribute
    pub fn strict() -> Self {
        Self::default()
    }

    /// Comparison for a copy on another filesystem: owner and group ignored
    pub fn relocation() -> Self {
        Self {
            ignore_owner: true,
            ignore_group: true,
            ignore_permissions: false,
        }
    }

    /// Also ignore permission bits
    pub fn without_permissions(mut self) -> Self {
        self.ignore_permissions = true;
        self
    }
}

/// Snapshot comparator
#[derive(Debug, Clone, Default)]
pub struct Differ {
    options: CompareOptions,
}

impl Differ {
    /// Create a differ with the given options
    pub fn new(options: CompareOptions) -> Self {
        Self { options }
    }

    /// Options in effect
    pub fn options(&self) -> CompareOptions {
        self.options
    }

    /// Compare `target` against `baseline`
    pub fn compare(&self, baseline: &Snapshot, target: &Snapshot) -> DiffResult {
        let mut entries = Vec::with_capacity(baseline.len().max(target.len()));
        let mut base_iter = baseline.records.iter().peekable();
        let mut target_iter = target.records.iter().peekable();
        let baseline_unreadable = UnreadablePaths::new(&baseline.errors);
        let target_unreadable = UnreadablePaths::new(&target.errors);

        loop {
            let order = match (base_iter.peek(), target_iter.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((b, _)), Some((t, _))) => b.cmp(t),
            };

            let entry = match order {
                Ordering::Less => match base_iter.next() {
                    Some((path, _)) => {
                        only_on_one_side(path, ChangeKind::Removed, target_unreadable.covers(path))
                    }
                    None => break,
                },
                Ordering::Greater => match target_iter.next() {
                    Some((path, _)) => {
                        only_on_one_side(path, ChangeKind::Added, baseline_unreadable.covers(path))
                    }
                    None => break,
                },
                Ordering::Equal => match (base_iter.next(), target_iter.next()) {
                    (Some((path, b)), Some((_, t))) => self.compare_records(path, b, t),
                    _ => break,
                },
            };
            entries.push(entry);
        }

        let result = DiffResult {
            baseline_root: baseline.root_path.clone(),
            target_root: target.root_path.clone(),
            entries,
            target_errors: target.errors.clone(),
        };

        let summary = result.summary();
        debug!(
            "Compared {} paths: {} changed ({} modified, {} added, {} removed, {} unreadable)",
            result.entries.len(),
            summary.total_changed(),
            summary.modified,
            summary.added,
            summary.removed,
            summary.unreadable
        );

        result
    }

    fn compare_records(&self, path: &str, baseline: &FileRecord, target: &FileRecord) -> RecordDiff {
        let mut changes = Vec::new();
        let mut push = |attribute: Attribute, b: String, t: String| {
            changes.push(AttributeChange {
                attribute,
                baseline: b,
                target: t,
            })
        };

        let type_changed = baseline.entry_type() != target.entry_type();
        if type_changed {
            push(
                Attribute::Type,
                baseline.entry_type().to_string(),
                target.entry_type().to_string(),
            );
        }

        let mut modified = false;
        if let (Some(b), Some(t)) = (baseline.content_hash(), target.content_hash()) {
            if b != t {
                modified = true;
                push(Attribute::Content, b.to_string(), t.to_string());
            }
        }
        if baseline.size != target.size {
            modified = true;
            push(Attribute::Size, baseline.size.to_string(), target.size.to_string());
        }
        if let (Some(b), Some(t)) = (baseline.symlink_target(), target.symlink_target()) {
            if b != t {
                modified = true;
                push(Attribute::Target, b.to_string(), t.to_string());
            }
        }

        let permission_changed =
            !self.options.ignore_permissions && baseline.permission_bits != target.permission_bits;
        if permission_changed {
            push(Attribute::Mode, baseline.mode_string(), target.mode_string());
        }

        let owner_changed = !self.options.ignore_owner && baseline.owner != target.owner;
        if owner_changed {
            push(Attribute::Owner, baseline.owner.to_string(), target.owner.to_string());
        }
        let group_changed = !self.options.ignore_group && baseline.group != target.group;
        if group_changed {
            push(Attribute::Group, baseline.group.to_string(), target.group.to_string());
        }

        if baseline.modified_time != target.modified_time {
            push(
                Attribute::Mtime,
                baseline.modified_time.to_rfc3339(),
                target.modified_time.to_rfc3339(),
            );
        }

        let kind = if type_changed {
            ChangeKind::TypeChanged
        } else if modified {
            ChangeKind::Modified
        } else if permission_changed {
            ChangeKind::PermissionChanged
        } else if owner_changed || group_changed {
            ChangeKind::OwnershipChanged
        } else {
            ChangeKind::Unchanged
        };

        RecordDiff {
            path: path.to_string(),
            kind,
            changes,
            unreadable: false,
        }
    }
}

fn only_on_one_side(path: &str, kind: ChangeKind, unreadable: bool) -> RecordDiff {
    RecordDiff {
        path: path.to_string(),
        kind,
        changes: Vec::new(),
        unreadable,
    }
}

/// Paths a scan failed on; an entry below a failed directory counts too
struct UnreadablePaths<'a> {
    paths: HashSet<&'a str>,
}

impl<'a> UnreadablePaths<'a> {
    fn new(errors: &'a [ScanError]) -> Self {
        Self {
            paths: errors
                .iter()
                .map(|e| e.relative_path.as_str())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    fn covers(&self, path: &str) -> bool {
        if self.paths.is_empty() {
            return false;
        }
        let mut current = path;
        loop {
            if self.paths.contains(current) {
                return true;
            }
            match current.rsplit_once('/') {
                Some((parent, _)) => current = parent,
                None => return false,
            }
        }
    }
}
