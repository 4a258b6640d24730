use sharelist::config::Config;
use sharelist::listing::{DirListingSource, PeerId};
use sharelist::shares::Shares;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
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

#[test]
fn test_clashing_share_names_get_suffix() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let first = a.path().join("Music");
    let second = b.path().join("Music");
    fs::create_dir(&first).unwrap();
    fs::create_dir(&second).unwrap();
    fs::write(first.join("one.mp3"), b"first").unwrap();
    fs::write(second.join("two.mp3"), b"second").unwrap();

    let shares = Shares::new(
        &config(vec![first, second]),
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();
    assert_eq!(shares.share_names(), vec!["Music", "Music-2"]);

    shares.tick_all();
    assert!(shares.wait_for_hashes(WAIT));

    let mut paths: Vec<String> = shares
        .export_local_listing()
        .into_iter()
        .map(|r| r.path)
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["Music-2/two.mp3", "Music/one.mp3"]);
    assert_eq!(
        shares.lookup("Music-2/two.mp3"),
        Some((*blake3::hash(b"second").as_bytes(), 6))
    );
    assert!(shares.lookup("Music/two.mp3").is_none());
    assert!(shares.lookup("Unknown/one.mp3").is_none());
}

#[test]
fn test_find_by_hash_across_shares() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    fs::write(a.path().join("copy1.txt"), b"same").unwrap();
    fs::create_dir(b.path().join("nested")).unwrap();
    fs::write(b.path().join("nested/copy2.txt"), b"same").unwrap();

    let shares = Shares::new(
        &config(vec![a.path().to_path_buf(), b.path().to_path_buf()]),
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();
    shares.tick_all();
    assert!(shares.wait_for_hashes(WAIT));

    let found = shares.find_by_hash(blake3::hash(b"same").as_bytes());
    assert_eq!(found.len(), 2);
    assert!(found.iter().any(|p| p.ends_with("copy1.txt")));
    assert!(found.iter().any(|p| p.ends_with("nested/copy2.txt")));
}

#[test]
fn test_duplicate_peer_rejected() {
    let listings = tempdir().unwrap();
    let source = Arc::new(DirListingSource::new(listings.path()));
    let mut shares = Shares::new(&config(Vec::new()), Arc::new(AtomicBool::new(false))).unwrap();

    shares
        .add_remote_peer(PeerId::from("alice"), source.clone())
        .unwrap();
    assert!(shares
        .add_remote_peer(PeerId::from("alice"), source)
        .is_err());
    assert!(shares.remote_storage(&PeerId::from("alice")).is_some());
    assert!(shares.remote_storage(&PeerId::from("bob")).is_none());
}

#[test]
fn test_started_updaters_index_in_background() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("bg.txt"), b"background").unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut shares = Shares::new(
        &config(vec![dir.path().to_path_buf()]),
        Arc::clone(&shutdown),
    )
    .unwrap();
    let name = shares.share_names()[0].to_string();

    shares.start().unwrap();
    let deadline = Instant::now() + WAIT;
    let path = format!("{name}/bg.txt");
    while shares.lookup(&path).is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(shares.lookup(&path).is_some());

    shutdown.store(true, Ordering::SeqCst);
    shares.stop();
}

#[test]
fn test_load_refused_while_running() {
    let dir = tempdir().unwrap();
    let data = tempdir().unwrap();
    let mut shares = Shares::new(
        &config(vec![dir.path().to_path_buf()]),
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    shares.start().unwrap();
    assert!(shares.load(data.path()).is_err());
    shares.stop();
    assert!(shares.load(data.path()).is_ok());
}
