//! Edge cases around names, entry kinds and racing hash results.

use sharelist::cache::{HashCache, HashCacheConfig};
use sharelist::listing::RawListingRecord;
use sharelist::scanner::{hash_to_hex, WalkerConfig};
use sharelist::storage::{DirectoryStorage, EntryType, StorageError};
use sharelist::updater::{DirectoryUpdater, LocalDirectoryUpdater, LocalUpdaterConfig};
use std::fs;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(10);

fn updater(root: &std::path::Path) -> (LocalDirectoryUpdater, HashCache) {
    let cache = HashCache::new(HashCacheConfig::default()).unwrap();
    let config = LocalUpdaterConfig {
        scan_interval: Duration::from_millis(10),
        sweep_interval: Duration::ZERO,
        walker: WalkerConfig::default(),
    };
    (
        LocalDirectoryUpdater::new("share", root, cache.clone(), config),
        cache,
    )
}

#[test]
fn test_decomposed_names_are_stored_composed() {
    let dir = tempdir().unwrap();
    // "e" + combining acute accent
    fs::write(dir.path().join("cafe\u{301}.txt"), b"coffee").unwrap();
    let (updater, cache) = updater(dir.path());

    updater.tick();
    assert!(cache.wait_idle(WAIT));

    assert!(updater.storage().lookup("caf\u{e9}.txt").is_some());
}

#[test]
fn test_names_equal_after_normalization_do_not_fight() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("caf\u{e9}.txt"), b"short").unwrap();
    fs::write(dir.path().join("cafe\u{301}.txt"), b"a much longer body").unwrap();
    let (updater, cache) = updater(dir.path());

    let first = updater.tick();
    assert!(cache.wait_idle(WAIT));
    assert_eq!(first.files, 2);
    assert_eq!(first.hash_requests, 1);
    assert_eq!(first.unreadable, 1);

    for _ in 0..2 {
        let report = updater.tick();
        assert!(cache.wait_idle(WAIT));
        assert_eq!(report.hash_requests, 0);
    }

    let paths: Vec<String> = updater.storage().walk().map(|(p, _)| p).collect();
    assert_eq!(paths, vec!["caf\u{e9}.txt".to_string()]);
    // The decomposed name sorts first and keeps the entry.
    assert_eq!(
        updater.storage().file_info("caf\u{e9}.txt"),
        Some((*blake3::hash(b"a much longer body").as_bytes(), 18))
    );
}

#[test]
fn test_file_replaced_by_directory() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("thing");
    fs::write(&path, b"was a file").unwrap();
    let (updater, cache) = updater(dir.path());
    updater.tick();
    assert!(cache.wait_idle(WAIT));

    fs::remove_file(&path).unwrap();
    fs::create_dir(&path).unwrap();
    fs::write(path.join("inner.txt"), b"now a dir").unwrap();
    updater.tick();
    assert!(cache.wait_idle(WAIT));

    let storage = updater.storage();
    let entry = storage.entry(storage.lookup("thing").unwrap()).unwrap();
    assert!(entry.is_dir());
    assert!(storage.file_info("thing/inner.txt").is_some());
}

#[test]
fn test_file_changed_during_hash_is_rehashed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("racy.bin");
    fs::write(&path, b"first").unwrap();
    let (updater, cache) = updater(dir.path());

    updater.tick();
    fs::write(&path, b"second version").unwrap();
    assert!(cache.wait_idle(WAIT));
    updater.tick();
    assert!(cache.wait_idle(WAIT));

    assert_eq!(
        updater.storage().file_info("racy.bin"),
        Some((*blake3::hash(b"second version").as_bytes(), 14))
    );
}

#[test]
fn test_storage_rejects_bad_names_and_duplicates() {
    let storage = DirectoryStorage::new("s");
    let root = storage.root();
    for bad in ["", ".", "..", "a/b"] {
        assert!(matches!(
            storage.create_entry(root, bad, EntryType::File),
            Err(StorageError::InvalidName(_))
        ));
    }
    let file = storage.create_entry(root, "x", EntryType::File).unwrap();
    assert!(matches!(
        storage.create_entry(root, "x", EntryType::Directory),
        Err(StorageError::DuplicateName { .. })
    ));
    assert!(matches!(
        storage.create_entry(file, "child", EntryType::File),
        Err(StorageError::InvalidParent(_))
    ));
    assert!(matches!(
        storage.remove_entry(root),
        Err(StorageError::RootRemoval)
    ));
}

#[test]
fn test_directory_metadata_update_rejected_for_file_kind() {
    let storage = DirectoryStorage::new("s");
    let dir = storage
        .create_entry(storage.root(), "d", EntryType::Directory)
        .unwrap();
    assert!(matches!(
        storage.update_file_metadata(dir, 1, SystemTime::UNIX_EPOCH, None),
        Err(StorageError::WrongKind(_))
    ));
}

#[test]
fn test_listing_record_validation() {
    let hex = hash_to_hex(&[1u8; 32]);
    let raw = |path: &str, size: i64| RawListingRecord {
        path: Some(path.to_string()),
        size: Some(size),
        modified: Some(0),
        hash: Some(hex.clone()),
    };

    assert!(raw("ok/file", 1).validate().is_ok());
    assert!(raw("zero", 0).validate().is_err());
    assert!(raw("/absolute", 1).validate().is_err());
    assert!(raw("a//b", 1).validate().is_err());
    assert!(raw("", 1).validate().is_err());
    let missing = RawListingRecord {
        hash: None,
        ..raw("x", 1)
    };
    assert!(missing.validate().is_err());
}
