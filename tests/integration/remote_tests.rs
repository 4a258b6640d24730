use sharelist::listing::{
    to_unix_secs, DirListingSource, ListingRecord, PeerId, RawListingRecord,
};
use sharelist::scanner::hash_to_hex;
use sharelist::updater::{DirectoryUpdater, RemoteDirectoryUpdater};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

fn record(path: &str, size: u64, secs: u64, byte: u8) -> ListingRecord {
    ListingRecord {
        path: path.to_string(),
        size,
        modified: at(secs),
        hash: [byte; 32],
    }
}

fn updater(dir: &std::path::Path, peer: &str) -> RemoteDirectoryUpdater {
    RemoteDirectoryUpdater::new(
        PeerId::from(peer),
        Arc::new(DirListingSource::new(dir)),
        Duration::from_secs(60),
    )
}

#[test]
fn test_published_listing_is_mirrored() {
    let dir = tempdir().unwrap();
    let source = DirListingSource::new(dir.path());
    let alice = PeerId::from("alice");
    source
        .publish(
            &alice,
            &[
                record("music/a.mp3", 100, 1_700_000_000, 1),
                record("music/b.mp3", 200, 1_700_000_500, 2),
                record("notes.txt", 5, 1_600_000_000, 3),
            ],
        )
        .unwrap();

    let updater = updater(dir.path(), "alice");
    let report = updater.tick();

    assert!(!report.fetch_failed);
    assert_eq!(report.files, 3);
    assert_eq!(report.malformed, 0);
    let storage = updater.storage();
    assert_eq!(storage.file_info("music/b.mp3"), Some(([2u8; 32], 200)));
    let music = storage.entry(storage.lookup("music").unwrap()).unwrap();
    assert_eq!(music.last_modified, at(1_700_000_500));
    assert_eq!(storage.export_listing().len(), 3);
}

#[test]
fn test_malformed_record_is_skipped() {
    let dir = tempdir().unwrap();
    let raw = vec![
        RawListingRecord {
            path: Some("good.txt".to_string()),
            size: Some(4),
            modified: Some(1_700_000_000),
            hash: Some(hash_to_hex(&[9u8; 32])),
        },
        RawListingRecord {
            path: Some("bad.txt".to_string()),
            size: Some(-1),
            modified: Some(1_700_000_000),
            hash: Some(hash_to_hex(&[9u8; 32])),
        },
        RawListingRecord {
            path: Some("../escape.txt".to_string()),
            size: Some(1),
            modified: Some(1_700_000_000),
            hash: Some(hash_to_hex(&[9u8; 32])),
        },
        RawListingRecord {
            path: Some("nohash.txt".to_string()),
            size: Some(1),
            modified: Some(1_700_000_000),
            hash: Some("zz".to_string()),
        },
    ];
    fs::write(
        dir.path().join("bob.json"),
        serde_json::to_string(&raw).unwrap(),
    )
    .unwrap();

    let updater = updater(dir.path(), "bob");
    let report = updater.tick();

    assert_eq!(report.files, 1);
    assert_eq!(report.malformed, 3);
    let storage = updater.storage();
    assert!(storage.lookup("good.txt").is_some());
    assert!(storage.lookup("bad.txt").is_none());
    assert!(storage.lookup("nohash.txt").is_none());
}

#[test]
fn test_absent_records_disappear_on_next_listing() {
    let dir = tempdir().unwrap();
    let source = DirListingSource::new(dir.path());
    let carol = PeerId::from("carol");
    source
        .publish(
            &carol,
            &[record("a/x.bin", 1, 10, 1), record("b/y.bin", 2, 20, 2)],
        )
        .unwrap();
    let updater = updater(dir.path(), "carol");
    updater.tick();

    source.publish(&carol, &[record("a/x.bin", 1, 10, 1)]).unwrap();
    let report = updater.tick();

    assert_eq!(report.removed(), 2);
    assert!(updater.storage().lookup("b").is_none());
    assert!(updater.storage().lookup("a/x.bin").is_some());
}

#[test]
fn test_unreachable_peer_keeps_mirror() {
    let dir = tempdir().unwrap();
    let source = DirListingSource::new(dir.path());
    let dave = PeerId::from("dave");
    source.publish(&dave, &[record("keep.txt", 3, 30, 4)]).unwrap();
    let updater = updater(dir.path(), "dave");
    updater.tick();

    fs::remove_file(source.listing_path(&dave)).unwrap();
    let report = updater.tick();

    assert!(report.fetch_failed);
    assert_eq!(updater.storage().file_info("keep.txt"), Some(([4u8; 32], 3)));
}

#[test]
fn test_undecodable_listing_keeps_mirror() {
    let dir = tempdir().unwrap();
    let source = DirListingSource::new(dir.path());
    let erin = PeerId::from("erin");
    source.publish(&erin, &[record("keep.txt", 3, 30, 4)]).unwrap();
    let updater = updater(dir.path(), "erin");
    updater.tick();

    fs::write(source.listing_path(&erin), "{ not a listing").unwrap();
    let report = updater.tick();

    assert!(report.fetch_failed);
    assert!(updater.storage().lookup("keep.txt").is_some());
}

#[test]
fn test_changed_record_replaces_hash() {
    let dir = tempdir().unwrap();
    let source = DirListingSource::new(dir.path());
    let frank = PeerId::from("frank");
    source.publish(&frank, &[record("f.txt", 3, 30, 1)]).unwrap();
    let updater = updater(dir.path(), "frank");
    updater.tick();

    source.publish(&frank, &[record("f.txt", 4, 40, 2)]).unwrap();
    updater.tick();

    let storage = updater.storage();
    assert_eq!(storage.file_info("f.txt"), Some(([2u8; 32], 4)));
    let entry = storage.entry(storage.lookup("f.txt").unwrap()).unwrap();
    assert_eq!(to_unix_secs(entry.last_modified), 40);
}
