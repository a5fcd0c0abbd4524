//! Directory report built from a snapshot
//!
//! [`SnapshotSummary`] answers the questions asked before archiving a run
//! directory: how big it is, who owns it, what the top-level layout looks
//! like, whether permissions will stop the group from reading or managing
//! it, and which symlinks point outside of it. Everything is computed from
//! the recorded snapshot, never from the live tree.

use crate::types::{EntryType, FileRecord, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

/// Mode bit: readable by owner
const OWNER_READ: u32 = 0o400;
/// Mode bit: readable by group
const GROUP_READ: u32 = 0o040;
/// Mode bit: writable by group
const GROUP_WRITE: u32 = 0o020;

/// Counts of regular files whose mode hampers shared access
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionFlags {
    /// Files the owner cannot read
    pub owner_unreadable: usize,
    /// Files the group cannot read
    pub group_unreadable: usize,
    /// Files the group cannot write
    pub group_unwritable: usize,
}

impl PermissionFlags {
    fn record(&mut self, record: &FileRecord) {
        let mode = record.permission_bits;
        if mode & OWNER_READ == 0 {
            self.owner_unreadable += 1;
        }
        if mode & GROUP_READ == 0 {
            self.group_unreadable += 1;
        }
        if mode & GROUP_WRITE == 0 {
            self.group_unwritable += 1;
        }
    }

    /// Whether no file was flagged
    pub fn is_clear(&self) -> bool {
        *self == Self::default()
    }
}

/// A path together with its modification time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatedPath {
    pub relative_path: String,
    pub modified_time: DateTime<Utc>,
}

/// Totals for one top-level subdirectory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySummary {
    /// Directory name (a top-level relative path)
    pub name: String,
    /// Regular files anywhere below it
    pub file_count: usize,
    /// Bytes in those files
    pub total_size: u64,
    /// Owning user ids of those files
    pub owners: BTreeSet<u32>,
    pub permissions: PermissionFlags,
}

impl DirectorySummary {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            file_count: 0,
            total_size: 0,
            owners: BTreeSet::new(),
            permissions: PermissionFlags::default(),
        }
    }
}

/// Symlink whose target lies outside the tracked directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    /// Relative path of the link
    pub relative_path: String,
    /// Target as stored in the link
    pub target: String,
}

/// What a snapshot says about its directory as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub root_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub total_size: u64,
    pub file_count: usize,
    pub directory_count: usize,
    pub symlink_count: usize,
    /// Owning user ids across all entries
    pub owners: BTreeSet<u32>,
    /// Owning group ids across all entries
    pub groups: BTreeSet<u32>,
    /// Regular file with the earliest modification time
    pub oldest: Option<DatedPath>,
    /// Regular file with the latest modification time
    pub newest: Option<DatedPath>,
    /// One entry per top-level subdirectory, in path order
    pub directories: Vec<DirectorySummary>,
    pub permissions: PermissionFlags,
    /// Entries whose name contains `tmp`
    pub temp_files: Vec<String>,
    pub external_links: Vec<ExternalLink>,
    /// Entries the scan could not capture
    pub unreadable: usize,
}

impl SnapshotSummary {
    /// Build the report for `snapshot`
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut summary = Self {
            root_path: snapshot.root_path.clone(),
            created_at: snapshot.created_at,
            total_size: 0,
            file_count: 0,
            directory_count: 0,
            symlink_count: 0,
            owners: BTreeSet::new(),
            groups: BTreeSet::new(),
            oldest: None,
            newest: None,
            directories: Vec::new(),
            permissions: PermissionFlags::default(),
            temp_files: Vec::new(),
            external_links: Vec::new(),
            unreadable: snapshot.errors.len(),
        };

        let mut directories: BTreeMap<&str, DirectorySummary> = BTreeMap::new();
        for record in snapshot.records.values() {
            if record.entry_type() == EntryType::Directory && record.parent_path().is_none() {
                directories.insert(&record.relative_path, DirectorySummary::new(&record.relative_path));
            }
        }

        for record in snapshot.records.values() {
            summary.owners.insert(record.owner);
            summary.groups.insert(record.group);
            if base_name(&record.relative_path).contains("tmp") {
                summary.temp_files.push(record.relative_path.clone());
            }

            match record.entry_type() {
                EntryType::File => {
                    summary.file_count += 1;
                    summary.total_size += record.size;
                    summary.permissions.record(record);
                    summary.track_age(record);

                    if let Some(dir) = top_level(&record.relative_path).and_then(|t| directories.get_mut(t)) {
                        dir.file_count += 1;
                        dir.total_size += record.size;
                        dir.owners.insert(record.owner);
                        dir.permissions.record(record);
                    }
                }
                EntryType::Directory => summary.directory_count += 1,
                EntryType::Symlink => {
                    summary.symlink_count += 1;
                    if let Some(target) = record.symlink_target() {
                        if is_external(&record.relative_path, target, &snapshot.root_path) {
                            summary.external_links.push(ExternalLink {
                                relative_path: record.relative_path.clone(),
                                target: target.to_string(),
                            });
                        }
                    }
                }
                EntryType::Other => {}
            }
        }

        summary.directories = directories.into_values().collect();
        summary
    }

    fn track_age(&mut self, record: &FileRecord) {
        let dated = || DatedPath {
            relative_path: record.relative_path.clone(),
            modified_time: record.modified_time,
        };
        // Records arrive in path order, so ties keep the first path
        if self.oldest.as_ref().is_none_or(|o| record.modified_time < o.modified_time) {
            self.oldest = Some(dated());
        }
        if self.newest.as_ref().is_none_or(|n| record.modified_time > n.modified_time) {
            self.newest = Some(dated());
        }
    }

    /// Distinct target directories of the external links
    ///
    /// A target is assumed to name a file, so its parent is reported, unless
    /// it ends in `/`.
    pub fn external_directories(&self) -> Vec<String> {
        let mut dirs = BTreeSet::new();
        for link in &self.external_links {
            let target = link.target.as_str();
            let dir = match target.strip_suffix('/') {
                Some(dir) => dir,
                None => match target.rsplit_once('/') {
                    Some(("", _)) => "/",
                    Some((parent, _)) => parent,
                    None => ".",
                },
            };
            dirs.insert(dir.to_string());
        }
        dirs.into_iter().collect()
    }
}

impl Snapshot {
    /// Directory report for this snapshot, see [`SnapshotSummary`]
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary::from_snapshot(self)
    }
}

fn base_name(relative_path: &str) -> &str {
    relative_path.rsplit('/').next().unwrap_or(relative_path)
}

fn top_level(relative_path: &str) -> Option<&str> {
    relative_path.split_once('/').map(|(first, _)| first)
}

/// Whether a link at `link_path` pointing to `target` leaves the tree
///
/// Resolution is lexical. An absolute target is external unless it lies
/// under `root`; a relative one is external when its `..` components climb
/// above the root.
fn is_external(link_path: &str, target: &str, root: &Path) -> bool {
    let target_path = Path::new(target);
    if target_path.is_absolute() {
        return !normalize(target_path).starts_with(normalize(root));
    }

    // Depth of the directory holding the link, relative to the root
    let mut depth: usize = link_path.matches('/').count();
    for component in target_path.components() {
        match component {
            Component::ParentDir => {
                if depth == 0 {
                    return true;
                }
                depth -= 1;
            }
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    false
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
