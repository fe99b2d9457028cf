//! Storage atomicity tests
//!
//! The active map must survive every failure mode short of losing the
//! disk: interrupted installs, staging leftovers, backup churn, and
//! repeated rollbacks. These tests exercise the storage manager against
//! a real temp filesystem.

use maplink_core::storage::{StorageError, StorageManager};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn make_store(max_backups: usize) -> (TempDir, StorageManager) {
    let dir = TempDir::new().expect("tempdir");
    let manager = StorageManager::new(
        dir.path().join("active/map.json"),
        dir.path().join("backup"),
        dir.path().join("staging"),
        max_backups,
    )
    .expect("storage manager must initialize");
    (dir, manager)
}

fn map_bytes(version: u64) -> Vec<u8> {
    format!(r#"{{"metadata":{{"version":{version}}},"zones":[]}}"#).into_bytes()
}

#[test]
fn test_repeated_installs_keep_exactly_one_active_map() {
    let (dir, store) = make_store(3);

    for version in 1..=8u64 {
        store.install(&map_bytes(version)).expect("install");
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(store.installed_version(), 8);

    // One active file, nothing stranded in staging.
    let active_entries: Vec<_> = fs::read_dir(dir.path().join("active"))
        .expect("active dir")
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(active_entries.len(), 1);

    let staging_entries: Vec<_> = fs::read_dir(dir.path().join("staging"))
        .expect("staging dir")
        .filter_map(|e| e.ok())
        .collect();
    assert!(staging_entries.is_empty(), "staging must be drained");
}

#[test]
fn test_backup_retention_cap_holds_under_churn() {
    let (dir, store) = make_store(2);

    for version in 1..=10u64 {
        store.install(&map_bytes(version)).expect("install");
        std::thread::sleep(Duration::from_millis(2));
    }

    let backups: Vec<_> = fs::read_dir(dir.path().join("backup"))
        .expect("backup dir")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    assert_eq!(backups.len(), 2);

    // The survivors are the two most recent predecessors.
    let mut contents: Vec<Vec<u8>> = backups
        .iter()
        .map(|p| fs::read(p).expect("backup readable"))
        .collect();
    contents.sort();
    assert_eq!(contents, vec![map_bytes(8), map_bytes(9)]);
}

#[test]
fn test_rollback_walks_backup_history() {
    let (_dir, store) = make_store(5);

    store.install(&map_bytes(1)).expect("install 1");
    std::thread::sleep(Duration::from_millis(2));
    store.install(&map_bytes(2)).expect("install 2");
    std::thread::sleep(Duration::from_millis(2));
    store.install(&map_bytes(3)).expect("install 3");
    assert_eq!(store.installed_version(), 3);

    store.rollback().expect("rollback to 2");
    assert_eq!(store.installed_version(), 2);

    // Rolling back again restores the same newest backup; the history
    // is not consumed by reading it.
    store.rollback().expect("rollback again");
    assert_eq!(store.installed_version(), 2);
}

#[test]
fn test_rollback_with_empty_history_is_explicit() {
    let (_dir, store) = make_store(3);
    assert!(matches!(store.rollback(), Err(StorageError::NoBackup)));
}

#[test]
fn test_stranded_staging_file_never_becomes_active() {
    // Simulates a crash after staging but before the rename: on the
    // next boot a stale staging file exists alongside a good active map.
    let (dir, store) = make_store(3);
    store.install(&map_bytes(4)).expect("install");

    fs::write(
        dir.path().join("staging/stage-deadbeef.json"),
        b"torn, partial write",
    )
    .expect("plant stray staging file");

    assert_eq!(store.installed_version(), 4);
    assert_eq!(store.active_bytes().expect("active"), map_bytes(4));

    // A subsequent install proceeds normally around the leftover.
    std::thread::sleep(Duration::from_millis(2));
    store.install(&map_bytes(5)).expect("install after crash");
    assert_eq!(store.installed_version(), 5);
}

#[test]
fn test_failed_backup_rotation_leaves_active_untouched() {
    let (dir, store) = make_store(3);
    store.install(&map_bytes(6)).expect("first install");

    // Sabotage the backup directory so the rotation step fails.
    fs::remove_dir_all(dir.path().join("backup")).expect("remove backup dir");
    fs::write(dir.path().join("backup"), b"not a directory").expect("block backup path");

    let result = store.install(&map_bytes(7));
    assert!(result.is_err(), "install must fail when rotation fails");

    // The active map is byte-identical and staging was cleaned up.
    assert_eq!(store.active_bytes().expect("active"), map_bytes(6));
    let staging_entries: Vec<_> = fs::read_dir(dir.path().join("staging"))
        .expect("staging dir")
        .filter_map(|e| e.ok())
        .collect();
    assert!(staging_entries.is_empty());
}

#[test]
fn test_first_install_needs_no_backup() {
    let (dir, store) = make_store(3);
    store.install(&map_bytes(1)).expect("first install");

    let backups: Vec<_> = fs::read_dir(dir.path().join("backup"))
        .expect("backup dir")
        .filter_map(|e| e.ok())
        .collect();
    assert!(backups.is_empty(), "nothing to back up before the first map");
}

#[test]
fn test_large_artifact_roundtrips_byte_exact() {
    let (_dir, store) = make_store(2);

    // A few megabytes, near the transfer ceiling.
    let zones: Vec<String> = (0..40_000)
        .map(|i| format!(r#"{{"id":"zone-{i}","limit_minutes":60}}"#))
        .collect();
    let big = format!(
        r#"{{"metadata":{{"version":11}},"zones":[{}]}}"#,
        zones.join(",")
    )
    .into_bytes();
    assert!(big.len() > 1_000_000);

    store.install(&big).expect("large install");
    assert_eq!(store.active_bytes().expect("active"), big);
    assert_eq!(store.installed_version(), 11);
}
