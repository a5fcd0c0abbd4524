//! Property-based testing for arqvist
//!
//! Uses proptest to verify invariants across randomly generated trees and
//! snapshots.

use ::arqvist::*;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One file to place in a generated tree
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub content: Vec<u8>,
}

/// Generate random relative file paths
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let dir_strategy = prop::collection::vec(
        prop_oneof!["[a-c]{1,2}", "Lane[1-2]", "Sample_[0-9]"],
        0..=3,
    );
    let filename_strategy = prop_oneof![
        "[a-z]{3,8}\\.fastq",
        "S[0-9]_R[12]\\.txt",
        "[a-z]{3,10}",
    ];

    (dir_strategy, filename_strategy).prop_map(|(dirs, filename)| {
        let mut path = PathBuf::new();
        for dir in dirs {
            path = path.join(dir);
        }
        path.join(filename)
    })
}

/// Generate random file content
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[ACGTN\n]{0,500}".prop_map(|s| s.into_bytes()),
        prop::collection::vec(any::<u8>(), 0..4096),
        (any::<u8>(), 1..1000usize).prop_map(|(byte, count)| vec![byte; count]),
    ]
}

fn tree_strategy() -> impl Strategy<Value = Vec<GeneratedFile>> {
    prop::collection::vec(
        (path_strategy(), content_strategy()).prop_map(|(path, content)| GeneratedFile { path, content }),
        0..30,
    )
}

/// Write generated files, skipping any that collide with an existing entry
/// of the other type
fn write_tree(root: &Path, files: &[GeneratedFile]) {
    for file in files {
        let full_path = root.join(&file.path);
        if let Some(parent) = full_path.parent() {
            if fs::create_dir_all(parent).is_err() {
                continue;
            }
        }
        if full_path.is_dir() {
            continue;
        }
        let _ = fs::write(&full_path, &file.content);
    }
}

/// Build a structurally valid snapshot without touching the filesystem
fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    let record_data = (
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..64).prop_map(|bytes| EntryKind::File {
                content_hash: utils::hash_data(&bytes),
            }),
            "[a-z./]{1,20}".prop_map(|target| EntryKind::Symlink { target }),
            Just(EntryKind::Other),
        ],
        any::<u64>(),
        0u32..0o10000,
        any::<u32>(),
        any::<u32>(),
        0i64..4_000_000_000,
        0u32..1_000_000_000,
    );

    (
        prop::collection::btree_map(path_strategy(), record_data, 0..25),
        0i64..4_000_000_000,
        0u32..1_000_000_000,
    )
        .prop_map(|(leaves, secs, nanos)| {
            let mut snapshot = Snapshot::new(PathBuf::from("/data/run"));
            snapshot.created_at = Utc.timestamp_opt(secs, nanos).unwrap();

            let leaf_paths: BTreeSet<String> = leaves
                .keys()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .collect();
            let mut dirs = BTreeSet::new();
            for path in &leaf_paths {
                let mut prefix = path.as_str();
                while let Some((parent, _)) = prefix.rsplit_once('/') {
                    dirs.insert(parent.to_string());
                    prefix = parent;
                }
            }

            for dir in &dirs {
                snapshot.insert(FileRecord {
                    relative_path: dir.clone(),
                    kind: EntryKind::Directory,
                    size: 0,
                    permission_bits: 0o755,
                    owner: 1000,
                    group: 1000,
                    modified_time: snapshot.created_at,
                });
            }
            for (path, (kind, size, mode, owner, group, secs, nanos)) in leaves {
                let relative_path = path.to_string_lossy().replace('\\', "/");
                // A leaf that is also some other leaf's ancestor stays a directory
                if dirs.contains(&relative_path) {
                    continue;
                }
                snapshot.insert(FileRecord {
                    relative_path,
                    kind,
                    size,
                    permission_bits: mode,
                    owner,
                    group,
                    modified_time: Utc.timestamp_opt(secs, nanos).unwrap(),
                });
            }
            snapshot
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Serialising then loading a snapshot yields an equal snapshot
    #[test]
    fn manifest_round_trip(snapshot in snapshot_strategy()) {
        prop_assert!(snapshot.validate().is_ok());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        let written = manifest::save(&snapshot, &path).unwrap();
        let (loaded, read) = manifest::load_with_fingerprint(&path).unwrap();

        prop_assert_eq!(&loaded, &snapshot);
        prop_assert_eq!(written, read);
        prop_assert_eq!(manifest::to_bytes(&loaded).unwrap(), fs::read(&path).unwrap());
    }

    /// Comparing a snapshot against itself reports nothing
    #[test]
    fn self_diff_is_clean(snapshot in snapshot_strategy()) {
        let result = Differ::new(CompareOptions::strict()).compare(&snapshot, &snapshot);
        prop_assert!(!result.has_differences());
        prop_assert_eq!(result.entries.len(), snapshot.len());
        prop_assert!(result.entries.iter().all(|e| e.changes.is_empty()));
    }

    /// Every path in either snapshot appears exactly once, in sorted order
    #[test]
    fn diff_covers_union(baseline in snapshot_strategy(), target in snapshot_strategy()) {
        let result = Differ::new(CompareOptions::strict()).compare(&baseline, &target);

        let union: Vec<&String> = baseline
            .records
            .keys()
            .chain(target.records.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let paths: Vec<&String> = result.entries.iter().map(|e| &e.path).collect();
        prop_assert_eq!(paths, union);

        for entry in &result.entries {
            let expected = match (baseline.get(&entry.path), target.get(&entry.path)) {
                (Some(_), None) => Some(ChangeKind::Removed),
                (None, Some(_)) => Some(ChangeKind::Added),
                (Some(b), Some(t)) if b.entry_type() != t.entry_type() => Some(ChangeKind::TypeChanged),
                (Some(b), Some(t)) if b.matches(t) => Some(ChangeKind::Unchanged),
                _ => None,
            };
            if let Some(kind) = expected {
                prop_assert_eq!(entry.kind, kind, "path {}", entry.path);
            }
        }
    }

    /// Scanning an untouched tree twice gives identical records
    #[test]
    fn scan_is_idempotent(files in tree_strategy(), workers in 1usize..5) {
        let temp_dir = TempDir::new().unwrap();
        write_tree(temp_dir.path(), &files);

        let first = Scanner::new(temp_dir.path()).scan().unwrap();
        let second = Scanner::new(temp_dir.path()).with_hash_workers(workers).scan().unwrap();

        prop_assert!(first.validate().is_ok());
        prop_assert_eq!(&first.records, &second.records);
        prop_assert!(first.errors.is_empty());

        let result = Differ::new(CompareOptions::strict()).compare(&first, &second);
        prop_assert!(result.entries.iter().all(|e| e.kind == ChangeKind::Unchanged));
    }

    /// Moving modification times around never produces a difference
    #[test]
    fn mtime_only_changes_are_not_differences(
        files in tree_strategy(),
        secs in 0i64..2_000_000_000,
    ) {
        let temp_dir = TempDir::new().unwrap();
        write_tree(temp_dir.path(), &files);
        let baseline = Scanner::new(temp_dir.path()).scan().unwrap();

        let stamp = filetime::FileTime::from_unix_time(secs, 0);
        for record in baseline.records.values() {
            if record.entry_type() != EntryType::Symlink {
                filetime::set_file_mtime(temp_dir.path().join(&record.relative_path), stamp).unwrap();
            }
        }

        let after = Scanner::new(temp_dir.path()).scan().unwrap();
        let result = Differ::new(CompareOptions::strict()).compare(&baseline, &after);
        prop_assert!(!result.has_differences());
        for entry in &result.entries {
            prop_assert!(entry.changes.iter().all(|c| c.attribute == Attribute::Mtime));
        }
    }

    /// Exclude patterns never let a matching path into the snapshot
    #[test]
    fn excluded_paths_never_appear(files in tree_strategy()) {
        let temp_dir = TempDir::new().unwrap();
        write_tree(temp_dir.path(), &files);

        let snapshot = Scanner::new(temp_dir.path())
            .with_exclude_patterns(vec!["**/*.fastq".to_string()])
            .scan()
            .unwrap();
        prop_assert!(snapshot.records.keys().all(|p| !p.ends_with(".fastq")));
        prop_assert!(snapshot.validate().is_ok());
    }
}
