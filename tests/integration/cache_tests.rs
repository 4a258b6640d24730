use sharelist::cache::{
    CacheDatabase, HashCache, HashCacheConfig, HashReady, HashStorageClient,
};
use sharelist::scanner::HashError;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Collector {
    ready: Mutex<Vec<HashReady>>,
    failed: Mutex<Vec<u64>>,
}

impl HashStorageClient for Collector {
    fn on_hash_ready(&self, ready: HashReady) {
        self.ready.lock().unwrap().push(ready);
    }

    fn on_hash_failed(&self, token: u64, _path: &Path, _error: &HashError) {
        self.failed.lock().unwrap().push(token);
    }
}

fn cache() -> HashCache {
    HashCache::new(HashCacheConfig {
        max_concurrent_hashes: 2,
        ..HashCacheConfig::default()
    })
    .unwrap()
}

#[test]
fn test_second_request_is_a_cache_hit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.bin");
    fs::write(&path, vec![7u8; 4096]).unwrap();
    let cache = cache();
    let client = Arc::new(Collector::default());

    cache.request_hash(1, &path, 4096, client.clone()).unwrap();
    assert!(cache.wait_idle(WAIT));
    cache.request_hash(2, &path, 4096, client.clone()).unwrap();
    assert!(cache.wait_idle(WAIT));

    let ready = client.ready.lock().unwrap();
    assert_eq!(ready.len(), 2);
    assert_eq!(ready[0].hash, ready[1].hash);
    assert_eq!(ready[1].token, 2);
    assert_eq!(ready[1].size, 4096);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_hash_matches_content() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, b"0123456789").unwrap();
    let cache = cache();
    let client = Arc::new(Collector::default());

    cache.request_hash(9, &path, 10, client.clone()).unwrap();
    assert!(cache.wait_idle(WAIT));

    let ready = client.ready.lock().unwrap();
    assert_eq!(ready[0].hash, *blake3::hash(b"0123456789").as_bytes());
    assert_eq!(ready[0].path, path);
    assert_eq!(ready[0].modified, fs::metadata(&path).unwrap().modified().unwrap());
}

#[test]
fn test_missing_file_is_rejected_without_callback() {
    let dir = tempdir().unwrap();
    let cache = cache();
    let client = Arc::new(Collector::default());

    let result = cache.request_hash(1, &dir.path().join("absent"), 1, client.clone());

    assert!(result.is_err());
    assert!(cache.wait_idle(WAIT));
    assert!(client.ready.lock().unwrap().is_empty());
    assert!(client.failed.lock().unwrap().is_empty());
}

#[test]
fn test_directory_is_rejected() {
    let dir = tempdir().unwrap();
    let cache = cache();
    let client = Arc::new(Collector::default());
    assert!(cache.request_hash(1, dir.path(), 0, client).is_err());
}

#[test]
fn test_cache_survives_sqlite_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("big.bin");
    fs::write(&path, vec![1u8; 10_000]).unwrap();
    let db_path = dir.path().join("hashes.db");

    let first = cache();
    let client = Arc::new(Collector::default());
    first.request_hash(1, &path, 10_000, client.clone()).unwrap();
    assert!(first.wait_idle(WAIT));
    let mut db = CacheDatabase::open(&db_path).unwrap();
    db.save(&first.serialize()).unwrap();
    db.close().unwrap();

    let second = cache();
    let snapshot = CacheDatabase::open(&db_path).unwrap().load().unwrap();
    assert_eq!(second.restore(snapshot).unwrap(), 1);
    second.request_hash(2, &path, 10_000, client.clone()).unwrap();
    assert!(second.wait_idle(WAIT));

    assert_eq!(second.stats().misses, 0);
    assert_eq!(second.stats().hits, 1);
    let ready = client.ready.lock().unwrap();
    assert_eq!(ready[0].hash, ready[1].hash);
}

#[test]
fn test_modified_file_is_recomputed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, b"one").unwrap();
    filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_500_000_000, 0)).unwrap();
    let cache = cache();
    let client = Arc::new(Collector::default());
    cache.request_hash(1, &path, 3, client.clone()).unwrap();
    assert!(cache.wait_idle(WAIT));

    fs::write(&path, b"two").unwrap();
    filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_500_000_001, 0)).unwrap();
    cache.request_hash(2, &path, 3, client.clone()).unwrap();
    assert!(cache.wait_idle(WAIT));

    assert_eq!(cache.stats().misses, 2);
    let ready = client.ready.lock().unwrap();
    assert_eq!(ready[1].hash, *blake3::hash(b"two").as_bytes());
    assert_eq!(cache.get(&path).unwrap().hash, ready[1].hash);
}
