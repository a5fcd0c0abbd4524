//! Main test module for arqvist
//!
//! This module includes all test suites:
//! - Integration tests for realistic run-directory scenarios
//! - Chaos tests for damaged manifests and hostile trees
//! - Property-based tests for invariants

pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::arqvist::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();

        let tracker = TrackerBuilder::new().init(temp_dir.path()).unwrap();
        let baseline = tracker.baseline().unwrap();
        assert!(baseline.is_empty());
        assert!(baseline.errors.is_empty());

        fs::write(temp_dir.path().join("file.txt"), "content").unwrap();
        let result = tracker.status(None, CompareOptions::strict()).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].kind, ChangeKind::Added);
    }

    #[test]
    fn test_modify_remove_add_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), "first").unwrap();
        fs::write(root.join("b.txt"), "second").unwrap();

        let tracker = TrackerBuilder::new().init(root).unwrap();

        fs::write(root.join("a.txt"), "first, edited").unwrap();
        fs::remove_file(root.join("b.txt")).unwrap();
        fs::write(root.join("c.txt"), "third").unwrap();

        let result = tracker.status(None, CompareOptions::strict()).unwrap();
        assert_eq!(result.get("a.txt").unwrap().kind, ChangeKind::Modified);
        assert_eq!(result.get("b.txt").unwrap().kind, ChangeKind::Removed);
        assert_eq!(result.get("c.txt").unwrap().kind, ChangeKind::Added);
        assert_eq!(result.entries.len(), 3);
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            "UPPERCASE.TXT",
            "échantillon_é.fastq",
            "样本.txt",
            ".hidden",
        ];
        for name in &special_names {
            fs::write(temp_dir.path().join(name), name.as_bytes()).unwrap();
        }

        let snapshot = Scanner::new(temp_dir.path()).scan().unwrap();
        assert_eq!(snapshot.len(), special_names.len());
        for name in &special_names {
            let record = snapshot.get(name).unwrap();
            assert_eq!(record.content_hash(), Some(utils::hash_data(name.as_bytes()).as_str()));
        }
    }

    #[test]
    fn test_deep_nesting() {
        let temp_dir = TempDir::new().unwrap();
        let mut path = temp_dir.path().to_path_buf();
        for i in 0..40 {
            path = path.join(format!("level{}", i));
        }
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("leaf.txt"), "deep").unwrap();

        let snapshot = Scanner::new(temp_dir.path()).scan().unwrap();
        assert_eq!(snapshot.len(), 41);
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_empty_file_hash() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("empty"), b"").unwrap();

        let snapshot = Scanner::new(temp_dir.path()).scan().unwrap();
        let record = snapshot.get("empty").unwrap();
        assert_eq!(record.size, 0);
        assert_eq!(
            record.content_hash(),
            Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_cyclic_and_broken_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("run")).unwrap();
        fs::write(root.join("run/data.fastq"), "@r\nACGT\n").unwrap();
        std::os::unix::fs::symlink("..", root.join("run/parent")).unwrap();
        std::os::unix::fs::symlink(root, root.join("run/absolute_root")).unwrap();
        std::os::unix::fs::symlink("does/not/exist", root.join("dangling")).unwrap();

        let tracker = TrackerBuilder::new().init(root).unwrap();
        let baseline = tracker.baseline().unwrap();
        assert_eq!(baseline.len(), 5);
        assert_eq!(baseline.get("run/parent").unwrap().symlink_target(), Some(".."));
        assert_eq!(baseline.get("dangling").unwrap().symlink_target(), Some("does/not/exist"));
        assert!(baseline.errors.is_empty());

        // Retargeting a link is a modification
        fs::remove_file(root.join("dangling")).unwrap();
        std::os::unix::fs::symlink("run/data.fastq", root.join("dangling")).unwrap();
        let result = tracker.status(None, CompareOptions::strict()).unwrap();
        let entry = result.get("dangling").unwrap();
        assert_eq!(entry.kind, ChangeKind::Modified);
        assert_eq!(entry.change(Attribute::Target).unwrap().baseline, "does/not/exist");
    }

    #[test]
    fn test_file_replaced_by_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("reads"), "not yet split").unwrap();

        let tracker = TrackerBuilder::new().init(root).unwrap();

        fs::remove_file(root.join("reads")).unwrap();
        fs::create_dir(root.join("reads")).unwrap();
        fs::write(root.join("reads/R1.fastq"), "@r1").unwrap();

        let result = tracker.status(None, CompareOptions::strict()).unwrap();
        assert_eq!(result.get("reads").unwrap().kind, ChangeKind::TypeChanged);
        assert_eq!(result.get("reads/R1.fastq").unwrap().kind, ChangeKind::Added);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("readable.txt"), "ok").unwrap();
        fs::write(root.join("locked.txt"), "secret").unwrap();
        fs::set_permissions(root.join("locked.txt"), fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(root.join("locked.txt")).is_ok() {
            // Privileged user, file modes are not enforced
            return;
        }

        let tracker = TrackerBuilder::new().init(root).unwrap();
        let baseline = tracker.baseline().unwrap();
        assert!(baseline.get("readable.txt").is_some());
        assert!(baseline.get("locked.txt").is_none());
        assert_eq!(baseline.errors.len(), 1);
        assert_eq!(baseline.errors[0].relative_path, "locked.txt");
        assert_eq!(baseline.errors[0].kind, ScanErrorKind::PermissionDenied);

        let result = tracker.status(None, CompareOptions::strict()).unwrap();
        assert!(!result.has_differences());
        assert_eq!(result.target_errors.len(), 1);

        fs::set_permissions(root.join("locked.txt"), fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_ownership_drift_only_with_strict() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "data").unwrap();
        let baseline = Scanner::new(temp_dir.path()).scan().unwrap();

        // Same tree as seen by a different account on the archive host
        let mut copy = baseline.clone();
        copy.root_path = "/archive/run".into();
        for record in copy.records.values_mut() {
            record.owner += 1;
            record.group += 1;
        }

        let relocated = Differ::new(CompareOptions::relocation()).compare(&baseline, &copy);
        assert!(!relocated.has_differences());
        assert!(relocated.entries[0].changes.is_empty());

        let strict = Differ::new(CompareOptions::strict()).compare(&baseline, &copy);
        let entry = strict.get("a.txt").unwrap();
        assert_eq!(entry.kind, ChangeKind::OwnershipChanged);
        assert!(entry.change(Attribute::Owner).is_some());
        assert!(entry.change(Attribute::Group).is_some());
    }

    #[test]
    fn test_status_of_missing_target() {
        let temp_dir = TempDir::new().unwrap();
        let tracker = TrackerBuilder::new().init(temp_dir.path()).unwrap();
        let err = tracker
            .status(Some(temp_dir.path().join("nowhere").as_path()), CompareOptions::relocation())
            .unwrap_err();
        assert!(matches!(err, ArqvistError::NotFound(_)));
    }
}
