use sharelist::config::Config;
use sharelist::listing::{DirListingSource, ListingRecord, PeerId};
use sharelist::shares::{Shares, CACHE_DB_FILE};
use sharelist::storage::{DirectoryStorage, EntryType, StorageSnapshot};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(10);

fn config(roots: Vec<PathBuf>) -> Config {
    Config {
        share_roots: roots,
        scan_interval_secs: 1,
        sweep_interval_secs: 1,
        ..Config::default()
    }
}

fn shares(config: &Config) -> Shares {
    Shares::new(config, Arc::new(AtomicBool::new(false))).unwrap()
}

#[test]
fn test_save_and_load_restores_index_and_cache() {
    let share = tempdir().unwrap();
    let root = share.path().join("docs");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), b"0123456789").unwrap();
    let data = tempdir().unwrap();
    let config = config(vec![root.clone()]);

    let first = shares(&config);
    first.tick_all();
    assert!(first.wait_for_hashes(WAIT));
    first.save(data.path()).unwrap();
    assert!(data.path().join("local-docs.json").is_file());
    assert!(data.path().join(CACHE_DB_FILE).is_file());

    let mut second = shares(&config);
    assert_eq!(second.load(data.path()).unwrap(), 1);
    let expected = (*blake3::hash(b"0123456789").as_bytes(), 10);
    assert_eq!(second.lookup("docs/a.txt"), Some(expected));

    // The restored entry is unchanged on disk, so nothing is requested.
    let report = second.tick_all();
    assert_eq!(report.hash_requests, 0);
    assert!(second.wait_for_hashes(WAIT));
    assert_eq!(second.lookup("docs/a.txt"), Some(expected));
}

#[test]
fn test_restored_cache_answers_without_hashing() {
    let share = tempdir().unwrap();
    let root = share.path().join("media");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("clip.bin"), vec![3u8; 2048]).unwrap();
    let data = tempdir().unwrap();
    let config = config(vec![root.clone()]);

    let first = shares(&config);
    first.tick_all();
    assert!(first.wait_for_hashes(WAIT));
    first.save(data.path()).unwrap();
    fs::remove_file(data.path().join("local-media.json")).unwrap();

    let mut second = shares(&config);
    assert_eq!(second.load(data.path()).unwrap(), 0);
    let report = second.tick_all();
    assert_eq!(report.hash_requests, 1);
    assert!(second.wait_for_hashes(WAIT));

    let stats = second.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
    assert!(second.lookup("media/clip.bin").is_some());
}

#[test]
fn test_tampered_snapshot_is_ignored() {
    let share = tempdir().unwrap();
    let root = share.path().join("docs");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("a.txt"), b"content").unwrap();
    let data = tempdir().unwrap();
    let config = config(vec![root.clone()]);

    let first = shares(&config);
    first.tick_all();
    assert!(first.wait_for_hashes(WAIT));
    first.save(data.path()).unwrap();

    let snapshot_path = data.path().join("local-docs.json");
    let tampered = fs::read_to_string(&snapshot_path)
        .unwrap()
        .replace("a.txt", "b.txt");
    fs::write(&snapshot_path, tampered).unwrap();

    let mut second = shares(&config);
    assert_eq!(second.load(data.path()).unwrap(), 0);
    assert!(second.lookup("docs/a.txt").is_none());
    assert!(second.lookup("docs/b.txt").is_none());
}

#[test]
fn test_remote_mirror_persisted() {
    let listings = tempdir().unwrap();
    let data = tempdir().unwrap();
    let source = Arc::new(DirListingSource::new(listings.path()));
    let peer = PeerId::from("alice");
    source
        .publish(
            &peer,
            &[ListingRecord {
                path: "songs/one.ogg".to_string(),
                size: 42,
                modified: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000),
                hash: [5u8; 32],
            }],
        )
        .unwrap();
    let config = config(Vec::new());

    let mut first = shares(&config);
    first.add_remote_peer(peer.clone(), source.clone()).unwrap();
    first.tick_all();
    first.save(data.path()).unwrap();

    let mut second = shares(&config);
    second.add_remote_peer(peer.clone(), source).unwrap();
    assert_eq!(second.load(data.path()).unwrap(), 1);
    let mirror = second.remote_storage(&peer).unwrap();
    assert_eq!(mirror.file_info("songs/one.ogg"), Some(([5u8; 32], 42)));
}

#[test]
fn test_peers_with_similar_ids_keep_separate_snapshots() {
    let listings = tempdir().unwrap();
    let data = tempdir().unwrap();
    let source = Arc::new(DirListingSource::new(listings.path()));
    let peers = [PeerId::from("alice@home"), PeerId::from("alice_home")];
    for (i, peer) in peers.iter().enumerate() {
        source
            .publish(
                peer,
                &[ListingRecord {
                    path: format!("from-{i}.txt"),
                    size: 10 + i as u64,
                    modified: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000),
                    hash: [i as u8 + 1; 32],
                }],
            )
            .unwrap();
    }
    let config = config(Vec::new());

    let mut first = shares(&config);
    for peer in &peers {
        first.add_remote_peer(peer.clone(), source.clone()).unwrap();
    }
    first.tick_all();
    first.save(data.path()).unwrap();

    let mut second = shares(&config);
    for peer in &peers {
        second.add_remote_peer(peer.clone(), source.clone()).unwrap();
    }
    assert_eq!(second.load(data.path()).unwrap(), 2);
    for (i, peer) in peers.iter().enumerate() {
        let mirror = second.remote_storage(peer).unwrap();
        let paths: Vec<String> = mirror.walk().map(|(p, _)| p).collect();
        assert_eq!(paths, vec![format!("from-{i}.txt")]);
    }
}

#[test]
fn test_storage_snapshot_file_round_trip() {
    let dir = tempdir().unwrap();
    let storage = DirectoryStorage::new("share");
    let sub = storage
        .create_entry(storage.root(), "sub", EntryType::Directory)
        .unwrap();
    let file = storage.create_entry(sub, "f.bin", EntryType::File).unwrap();
    storage
        .update_file_metadata(file, 9, SystemTime::UNIX_EPOCH, Some([1u8; 32]))
        .unwrap();

    let path = dir.path().join("share.json");
    storage.serialize().save(&path).unwrap();
    let restored = DirectoryStorage::restore(StorageSnapshot::load(&path).unwrap()).unwrap();

    assert_eq!(restored.label(), "share");
    assert_eq!(restored.lookup("sub/f.bin"), Some(file));
    assert_eq!(restored.file_info("sub/f.bin"), Some(([1u8; 32], 9)));
    let fresh = restored
        .create_entry(restored.root(), "new", EntryType::File)
        .unwrap();
    assert!(fresh.as_u64() > file.as_u64());
}
