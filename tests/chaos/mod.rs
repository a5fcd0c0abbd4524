//! Chaos testing for arqvist
//!
//! Damages manifests and config, races writers against each other, and
//! scans hostile trees. Nothing here may panic; every failure has to come
//! back as a typed error or a recorded scan error.

use ::arqvist::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use tracing::{info, warn};

/// Seeded source of damage
pub struct ChaosEngine {
    rng: StdRng,
}

impl ChaosEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Flip between one and eight random bytes
    pub fn flip_bytes(&mut self, data: &mut [u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let flips = self.rng.random_range(1..=8);
        for _ in 0..flips {
            let idx = self.rng.random_range(0..data.len());
            data[idx] ^= 1 << self.rng.random_range(0..8);
        }
        flips
    }

    /// Cut the data at a random point
    pub fn truncate(&mut self, data: &mut Vec<u8>) {
        let len = self.rng.random_range(0..data.len().max(1));
        data.truncate(len);
    }
}

fn populated_tracker() -> (TempDir, Tracker) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    for lane in 1..=2 {
        let dir = root.join(format!("Lane{}", lane));
        fs::create_dir(&dir).unwrap();
        for read in 1..=3 {
            fs::write(dir.join(format!("R{}.fastq", read)), format!("@lane{}\nACGT{}\n", lane, read)).unwrap();
        }
    }
    let tracker = TrackerBuilder::new().init(root).unwrap();
    (temp_dir, tracker)
}

fn assert_ok_or_corrupt(result: Result<Snapshot>, context: &str) {
    match result {
        Ok(snapshot) => assert!(snapshot.validate().is_ok(), "{}: loaded an invalid snapshot", context),
        Err(e) => assert!(e.is_corruption(), "{}: unexpected error {:?}", context, e),
    }
}

#[test]
fn test_random_manifest_corruption() {
    let (_temp_dir, tracker) = populated_tracker();
    let manifest_path = tracker.store().manifest_path();
    let pristine = fs::read(&manifest_path).unwrap();
    let mut chaos = ChaosEngine::new(42);

    let mut detected = 0;
    for round in 0..200 {
        let mut damaged = pristine.clone();
        if round % 4 == 0 {
            chaos.truncate(&mut damaged);
        } else {
            chaos.flip_bytes(&mut damaged);
        }
        fs::write(&manifest_path, &damaged).unwrap();

        let loaded = manifest::load(&manifest_path);
        if loaded.is_err() {
            detected += 1;
        }
        assert_ok_or_corrupt(loaded, &format!("round {}", round));
    }

    info!("Detected corruption in {}/200 damaged manifests", detected);
    assert!(detected > 0);
}

#[test]
fn test_corrupt_manifest_fails_status_and_update() {
    let (_temp_dir, tracker) = populated_tracker();
    let manifest_path = tracker.store().manifest_path();
    fs::write(&manifest_path, b"{\"format_version\": 1, \"records\": ").unwrap();

    let err = tracker.status(None, CompareOptions::strict()).unwrap_err();
    assert!(err.is_corruption());
    let err = tracker.update().unwrap_err();
    assert!(err.is_corruption());

    // Nothing got archived from a manifest nobody could read
    assert!(tracker.history().unwrap().is_empty());
}

#[test]
fn test_manifest_breaking_invariants() {
    let (_temp_dir, tracker) = populated_tracker();
    let manifest_path = tracker.store().manifest_path();
    let mut snapshot = tracker.baseline().unwrap();

    // Parent directory removed from an otherwise well-formed manifest
    snapshot.records.remove("Lane1");
    fs::write(&manifest_path, serde_json::to_vec_pretty(&snapshot).unwrap()).unwrap();
    assert!(tracker.baseline().unwrap_err().is_corruption());

    // Key and record path disagree
    let mut snapshot = Snapshot::new("/x".into());
    let mut record = Scanner::new(tracker.root()).scan().unwrap().records["Lane1"].clone();
    record.relative_path = "Lane9".to_string();
    snapshot.records.insert("Lane1".to_string(), record);
    fs::write(&manifest_path, serde_json::to_vec_pretty(&snapshot).unwrap()).unwrap();
    assert!(tracker.baseline().unwrap_err().is_corruption());

    // Escaping path
    let mut snapshot = Snapshot::new("/x".into());
    let mut record = Scanner::new(tracker.root()).scan().unwrap().records["Lane1"].clone();
    record.relative_path = "../etc".to_string();
    snapshot.insert(record);
    fs::write(&manifest_path, serde_json::to_vec_pretty(&snapshot).unwrap()).unwrap();
    assert!(tracker.baseline().unwrap_err().is_corruption());
}

#[test]
fn test_damaged_config() {
    let (temp_dir, tracker) = populated_tracker();
    let config_path = tracker.store().config_path();

    fs::write(&config_path, b"not json").unwrap();
    assert!(matches!(
        Tracker::open(temp_dir.path()).unwrap_err(),
        ArqvistError::InvalidConfiguration(_)
    ));

    fs::remove_file(&config_path).unwrap();
    assert!(matches!(
        Tracker::open(temp_dir.path()).unwrap_err(),
        ArqvistError::NotInitialized(_)
    ));
}

#[test]
fn test_missing_manifest_with_marker() {
    let (temp_dir, tracker) = populated_tracker();
    fs::remove_file(tracker.store().manifest_path()).unwrap();

    let tracker = Tracker::open(temp_dir.path()).unwrap();
    assert!(matches!(
        tracker.status(None, CompareOptions::strict()).unwrap_err(),
        ArqvistError::ManifestNotFound(_)
    ));
}

#[test]
fn test_racing_updates() {
    let (temp_dir, _tracker) = populated_tracker();
    let root = temp_dir.path().to_path_buf();
    let writers = 6;
    let barrier = Arc::new(Barrier::new(writers));

    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let root = root.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let tracker = Tracker::open(&root).unwrap();
                fs::write(root.join(format!("writer_{}.log", i)), format!("writer {}", i)).unwrap();
                barrier.wait();
                tracker.update()
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => succeeded += 1,
            Err(ArqvistError::ConcurrentWriteConflict(path)) => {
                warn!("Writer lost the race on {:?}", path);
            }
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert!(succeeded >= 1);

    // Whatever won, the manifest on disk is whole and every archive loads
    let tracker = Tracker::open(&root).unwrap();
    assert!(tracker.baseline().unwrap().validate().is_ok());
    for entry in tracker.history().unwrap() {
        entry.load().unwrap();
    }

    // A quiet follow-up update picks up whatever the losers scanned
    tracker.update().unwrap();
    let result = tracker.status(None, CompareOptions::strict()).unwrap();
    assert!(!result.has_differences());
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_partial_scan() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::create_dir_all(root.join("open")).unwrap();
    fs::create_dir_all(root.join("sealed/inner")).unwrap();
    fs::write(root.join("open/a.fastq"), "@a").unwrap();
    fs::write(root.join("sealed/inner/b.fastq"), "@b").unwrap();
    fs::set_permissions(root.join("sealed"), fs::Permissions::from_mode(0o000)).unwrap();

    if fs::read_dir(root.join("sealed")).is_ok() {
        // Privileged user, directory modes are not enforced
        fs::set_permissions(root.join("sealed"), fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let snapshot = Scanner::new(root).scan().unwrap();
    fs::set_permissions(root.join("sealed"), fs::Permissions::from_mode(0o755)).unwrap();

    assert!(snapshot.get("open/a.fastq").is_some());
    assert!(snapshot.get("sealed/inner").is_none());
    assert!(!snapshot.errors.is_empty());
    assert!(snapshot
        .errors
        .iter()
        .any(|e| e.relative_path.starts_with("sealed") && e.kind == ScanErrorKind::PermissionDenied));
    assert!(snapshot.validate().is_ok());
}

/// Partial failure that does not depend on file modes being enforced
#[cfg(unix)]
#[test]
fn test_undecodable_name_partial_scan() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let (temp_dir, tracker) = populated_tracker();
    let root = temp_dir.path();
    let name = OsStr::from_bytes(b"R\xfe.fastq");
    if fs::write(root.join("Lane1").join(name), "@bad").is_err() {
        return;
    }

    tracker.update().unwrap();
    let baseline = tracker.baseline().unwrap();
    assert!(baseline.validate().is_ok());
    assert_eq!(baseline.errors.len(), 1);
    assert_eq!(baseline.errors[0].relative_path, "Lane1/R\u{FFFD}.fastq");

    // The failure persists through the manifest and scans stay comparable
    let result = tracker.status(None, CompareOptions::strict()).unwrap();
    assert!(!result.has_differences());
    assert_eq!(result.target_errors.len(), 1);
    assert!(result.target_errors[0].relative_path.starts_with("Lane1/"));
}

#[test]
fn test_garbage_in_history_is_ignored() {
    let (temp_dir, tracker) = populated_tracker();
    let history_dir = tracker.store().history_dir();
    fs::write(history_dir.join("README"), "not a manifest").unwrap();
    fs::write(history_dir.join("notes.txt"), "ignored").unwrap();

    fs::write(temp_dir.path().join("new.txt"), "x").unwrap();
    assert!(tracker.update().unwrap().superseded);

    let history = tracker.history().unwrap();
    assert_eq!(history.len(), 1);
    history[0].load().unwrap();
}

/// Files created with paths that are awkward on some platforms
#[test]
fn test_hostile_names_survive_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let names = ["quote\"d", "back\\slash", "tab\there", "new\nline", "percent%20", "{brace}"];
    let mut written = Vec::new();
    for name in names {
        if fs::write(root.join(name), name).is_ok() {
            written.push(name);
        }
    }

    let tracker = TrackerBuilder::new().init(root).unwrap();
    let baseline = tracker.baseline().unwrap();
    for name in &written {
        assert!(baseline.get(name).is_some(), "missing {:?}", name);
    }
    assert!(!tracker.status(None, CompareOptions::strict()).unwrap().has_differences());
}
