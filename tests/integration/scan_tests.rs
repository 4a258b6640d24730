use filetime::{set_file_mtime, FileTime};
use sharelist::cache::{HashCache, HashCacheConfig};
use sharelist::scanner::WalkerConfig;
use sharelist::storage::UpdateStatus;
use sharelist::updater::{DirectoryUpdater, LocalDirectoryUpdater, LocalUpdaterConfig};
use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(10);

fn cache() -> HashCache {
    HashCache::new(HashCacheConfig::default()).unwrap()
}

/// Sweeps on every tick.
fn eager_config() -> LocalUpdaterConfig {
    LocalUpdaterConfig {
        scan_interval: Duration::from_millis(10),
        sweep_interval: Duration::ZERO,
        walker: WalkerConfig::default(),
    }
}

fn tick_and_wait(updater: &LocalDirectoryUpdater, cache: &HashCache) {
    updater.tick();
    assert!(cache.wait_idle(WAIT), "hashes did not complete");
}

#[test]
fn test_single_file_indexed_with_hash() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
    let cache = cache();
    let updater = LocalDirectoryUpdater::new("share", dir.path(), cache.clone(), eager_config());

    tick_and_wait(&updater, &cache);

    let storage = updater.storage();
    let expected = *blake3::hash(b"0123456789").as_bytes();
    assert_eq!(storage.file_info("a.txt"), Some((expected, 10)));

    let walked: Vec<String> = storage.walk().map(|(path, _)| path).collect();
    assert_eq!(walked, vec!["a.txt".to_string()]);
    assert_eq!(updater.pending_hashes(), 0);
}

#[test]
fn test_nested_directories() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("music/rock")).unwrap();
    fs::write(dir.path().join("music/rock/song.mp3"), b"guitar").unwrap();
    fs::write(dir.path().join("music/readme.txt"), b"hello").unwrap();
    let cache = cache();
    let updater = LocalDirectoryUpdater::new("share", dir.path(), cache.clone(), eager_config());

    tick_and_wait(&updater, &cache);

    let storage = updater.storage();
    let walked: Vec<String> = storage.walk().map(|(path, _)| path).collect();
    assert_eq!(
        walked,
        vec![
            "music",
            "music/readme.txt",
            "music/rock",
            "music/rock/song.mp3"
        ]
    );
    let song = storage.lookup("music/rock/song.mp3").unwrap();
    assert_eq!(storage.path_of(song).unwrap(), "music/rock/song.mp3");
    assert_eq!(
        storage.file_info("music/rock/song.mp3").unwrap().0,
        *blake3::hash(b"guitar").as_bytes()
    );
}

#[test]
fn test_empty_files_are_not_indexed() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("empty.bin"), b"").unwrap();
    fs::write(dir.path().join("full.bin"), b"x").unwrap();
    let cache = cache();
    let updater = LocalDirectoryUpdater::new("share", dir.path(), cache.clone(), eager_config());

    tick_and_wait(&updater, &cache);

    assert!(updater.storage().lookup("empty.bin").is_none());
    assert!(updater.storage().lookup("full.bin").is_some());
}

#[test]
fn test_unchanged_files_are_not_rehashed() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"stable").unwrap();
    let cache = cache();
    let updater = LocalDirectoryUpdater::new("share", dir.path(), cache.clone(), eager_config());

    tick_and_wait(&updater, &cache);
    let report = updater.tick();

    assert_eq!(report.files, 1);
    assert_eq!(report.hash_requests, 0);
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn test_modified_file_gets_new_hash() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, b"before").unwrap();
    set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
    let cache = cache();
    let updater = LocalDirectoryUpdater::new("share", dir.path(), cache.clone(), eager_config());
    tick_and_wait(&updater, &cache);

    fs::write(&path, b"after!").unwrap();
    set_file_mtime(&path, FileTime::from_unix_time(1_600_000_100, 0)).unwrap();
    let report = updater.tick();
    assert_eq!(report.hash_requests, 1);
    assert!(cache.wait_idle(WAIT));

    assert_eq!(
        updater.storage().file_info("a.txt"),
        Some((*blake3::hash(b"after!").as_bytes(), 6))
    );
}

#[test]
fn test_deleted_entries_removed_by_sweep() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("old")).unwrap();
    fs::write(dir.path().join("old/gone.txt"), b"bye").unwrap();
    fs::write(dir.path().join("kept.txt"), b"hi").unwrap();
    let cache = cache();
    let updater = LocalDirectoryUpdater::new("share", dir.path(), cache.clone(), eager_config());
    tick_and_wait(&updater, &cache);
    assert!(updater.storage().lookup("old/gone.txt").is_some());

    fs::remove_dir_all(dir.path().join("old")).unwrap();
    let report = updater.tick();

    assert_eq!(report.removed(), 2);
    assert!(updater.storage().lookup("old").is_none());
    assert!(updater.storage().lookup("kept.txt").is_some());
}

#[test]
fn test_deletion_waits_for_sweep_interval() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"data").unwrap();
    let cache = cache();
    let config = LocalUpdaterConfig {
        sweep_interval: Duration::from_secs(3600),
        ..eager_config()
    };
    let updater = LocalDirectoryUpdater::new("share", dir.path(), cache.clone(), config);

    // First tick always sweeps and resets the marks.
    tick_and_wait(&updater, &cache);
    fs::remove_file(dir.path().join("a.txt")).unwrap();

    let report = updater.tick();
    assert!(report.swept.is_none());
    assert!(updater.storage().lookup("a.txt").is_some());

    updater.sweep();
    assert!(updater.storage().lookup("a.txt").is_none());
}

#[test]
fn test_ignore_patterns_and_hidden_files() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("keep.txt"), b"k").unwrap();
    fs::write(dir.path().join("skip.tmp"), b"s").unwrap();
    fs::write(dir.path().join(".secret"), b"h").unwrap();
    let cache = cache();
    let config = LocalUpdaterConfig {
        walker: WalkerConfig::new(false, true, vec!["*.tmp".to_string()]),
        ..eager_config()
    };
    let updater = LocalDirectoryUpdater::new("share", dir.path(), cache.clone(), config);

    tick_and_wait(&updater, &cache);

    let walked: Vec<String> = updater.storage().walk().map(|(path, _)| path).collect();
    assert_eq!(walked, vec!["keep.txt".to_string()]);
}

#[test]
fn test_missing_root_keeps_previous_tree() {
    let parent = tempdir().unwrap();
    let root = parent.path().join("share");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), b"content").unwrap();
    let cache = cache();
    let updater = LocalDirectoryUpdater::new("share", &root, cache.clone(), eager_config());
    tick_and_wait(&updater, &cache);

    fs::remove_dir_all(&root).unwrap();
    let report = updater.scan();

    assert!(report.unreadable >= 1);
    let storage = updater.storage();
    assert_eq!(
        storage.entry(storage.root()).unwrap().update_status,
        UpdateStatus::Stale
    );
    updater.sweep();
    assert!(storage.file_info("a.txt").is_some());
}

#[test]
fn test_shutdown_flag_skips_sweep() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"content").unwrap();
    let cache = cache();
    let flag = Arc::new(AtomicBool::new(true));
    let updater = LocalDirectoryUpdater::new("share", dir.path(), cache.clone(), eager_config())
        .with_shutdown_flag(flag);

    let report = updater.tick();

    assert!(report.swept.is_none());
    assert_eq!(report.hash_requests, 0);
}
