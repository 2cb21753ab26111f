//! End-to-end behavior of the bridge surface
//!
//! Drives `Bridge` the way a UI session would, against real temporary
//! directories and real OS watches.

use dirbridge::{Bridge, BridgeError, Config, FsErrorKind, SessionId, StaticPicker};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const NOTIFY_WINDOW: Duration = Duration::from_secs(5);

fn bridge() -> Bridge {
    Bridge::with_picker(&Config::default(), Box::new(StaticPicker::cancelling()))
        .expect("bridge starts")
}

fn attach(bridge: &Bridge) -> (SessionId, Receiver<dirbridge::ChangeNotification>) {
    let session = bridge.open_session();
    let (tx, rx) = mpsc::channel();
    bridge.on_directory_changed(&session, tx);
    (session, rx)
}

fn names(bridge: &Bridge, dir: &Path) -> Vec<String> {
    bridge
        .read_directory(dir)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect()
}

// =============================================================================
// Directory Reader
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_is_directory_matches_filesystem(
        layout in prop::collection::btree_map("[a-z]{1,8}", any::<bool>(), 0..12)
    ) {
        let dir = TempDir::new().unwrap();
        for (name, is_dir) in &layout {
            let path = dir.path().join(name);
            if *is_dir {
                std::fs::create_dir(&path).unwrap();
            } else {
                std::fs::write(&path, name).unwrap();
            }
        }

        let listed: BTreeMap<String, bool> = bridge()
            .read_directory(dir.path())
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.is_directory))
            .collect();
        prop_assert_eq!(listed, layout);
    }
}

#[test]
fn test_empty_directory_is_empty_list_not_error() {
    let dir = TempDir::new().unwrap();
    let entries = bridge().read_directory(dir.path()).unwrap();
    assert!(entries.is_empty());
}

#[test]
fn test_concurrent_reads_of_different_directories() {
    let bridge = Arc::new(bridge());
    let dirs: Vec<TempDir> = (0..4).map(|_| TempDir::new().unwrap()).collect();
    for (i, dir) in dirs.iter().enumerate() {
        for j in 0..=i {
            std::fs::write(dir.path().join(format!("f{}", j)), "").unwrap();
        }
    }

    let handles: Vec<_> = dirs
        .iter()
        .map(|dir| {
            let bridge = Arc::clone(&bridge);
            let path = dir.path().to_path_buf();
            thread::spawn(move || bridge.read_directory(&path).unwrap().len())
        })
        .collect();

    let counts: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(counts, vec![1, 2, 3, 4]);
}

// =============================================================================
// Watch Registry
// =============================================================================

#[test]
fn test_external_create_notifies_watched_directory() {
    let bridge = bridge();
    let dir = TempDir::new().unwrap();
    let (session, rx) = attach(&bridge);

    bridge.watch_directory(&session, dir.path()).unwrap();
    std::fs::write(dir.path().join("created.txt"), "x").unwrap();

    let change = rx.recv_timeout(NOTIFY_WINDOW).expect("notification");
    assert_eq!(change.path, dir.path());
}

#[test]
fn test_watch_twice_then_unwatch_once_stops_notifications() {
    let bridge = bridge();
    let dir = TempDir::new().unwrap();
    let (session, rx) = attach(&bridge);

    bridge.watch_directory(&session, dir.path()).unwrap();
    bridge.watch_directory(&session, dir.path()).unwrap();
    assert_eq!(bridge.watched_paths().len(), 1);

    bridge.unwatch_directory(&session, dir.path()).unwrap();
    assert!(bridge.watched_paths().is_empty());

    std::fs::write(dir.path().join("late.txt"), "x").unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
}

#[test]
fn test_unwatch_is_idempotent() {
    let bridge = bridge();
    let dir = TempDir::new().unwrap();
    let session = bridge.open_session();

    bridge.unwatch_directory(&session, dir.path()).unwrap();
    bridge.watch_directory(&session, dir.path()).unwrap();
    bridge.unwatch_directory(&session, dir.path()).unwrap();
    bridge.unwatch_directory(&session, dir.path()).unwrap();
}

#[test]
fn test_concurrent_watch_calls_leave_one_registration() {
    let bridge = Arc::new(bridge());
    let dir = TempDir::new().unwrap();
    let session = bridge.open_session();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            let session = session.clone();
            let path = dir.path().to_path_buf();
            thread::spawn(move || bridge.watch_directory(&session, &path).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(bridge.watched_paths(), vec![dir.path().to_path_buf()]);
    bridge.unwatch_directory(&session, dir.path()).unwrap();
    assert!(bridge.watched_paths().is_empty());
}

#[test]
fn test_watch_is_not_recursive() {
    let bridge = bridge();
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("nested");
    std::fs::create_dir(&nested).unwrap();
    let (session, rx) = attach(&bridge);

    bridge.watch_directory(&session, dir.path()).unwrap();
    std::fs::write(nested.join("deep.txt"), "x").unwrap();

    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
}

#[test]
fn test_watch_missing_directory_fails_cleanly() {
    let bridge = bridge();
    let dir = TempDir::new().unwrap();
    let session = bridge.open_session();

    let err = bridge
        .watch_directory(&session, &dir.path().join("absent"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Watch(_)));
    assert!(bridge.watched_paths().is_empty());
}

#[test]
fn test_shutdown_empties_registry() {
    let bridge = bridge();
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let session = bridge.open_session();
    bridge.watch_directory(&session, a.path()).unwrap();
    bridge.watch_directory(&session, b.path()).unwrap();

    bridge.shutdown();
    assert!(bridge.watched_paths().is_empty());
    assert!(bridge.watch_directory(&session, a.path()).is_err());
}

// =============================================================================
// Move Operator
// =============================================================================

#[test]
fn test_move_updates_both_listings() {
    let bridge = bridge();
    let root = TempDir::new().unwrap();
    let src_dir = root.path().join("inbox");
    let dest_dir = root.path().join("done");
    std::fs::create_dir(&src_dir).unwrap();
    std::fs::create_dir(&dest_dir).unwrap();
    std::fs::write(src_dir.join("task.md"), "x").unwrap();

    bridge
        .move_file(&src_dir.join("task.md"), &dest_dir)
        .unwrap();

    assert_eq!(names(&bridge, &dest_dir), vec!["task.md"]);
    assert!(names(&bridge, &src_dir).is_empty());
}

#[test]
fn test_move_missing_source_leaves_destination_unchanged() {
    let bridge = bridge();
    let root = TempDir::new().unwrap();
    std::fs::write(root.path().join("existing.txt"), "").unwrap();
    let before = names(&bridge, root.path());

    let err = bridge
        .move_file(&root.path().join("nope.txt"), root.path())
        .unwrap_err();
    match err {
        BridgeError::Filesystem(e) => assert_eq!(e.kind, FsErrorKind::NotFound),
        other => panic!("expected filesystem error, got {:?}", other),
    }
    assert_eq!(names(&bridge, root.path()), before);
}

#[test]
fn test_move_notifies_both_watched_directories() {
    let bridge = bridge();
    let root = TempDir::new().unwrap();
    let src_dir = root.path().join("from");
    let dest_dir = root.path().join("to");
    std::fs::create_dir(&src_dir).unwrap();
    std::fs::create_dir(&dest_dir).unwrap();
    std::fs::write(src_dir.join("card.txt"), "x").unwrap();

    let (session, rx) = attach(&bridge);
    bridge.watch_directory(&session, &src_dir).unwrap();
    bridge.watch_directory(&session, &dest_dir).unwrap();

    bridge.move_file(&src_dir.join("card.txt"), &dest_dir).unwrap();

    let mut seen_src = false;
    let mut seen_dest = false;
    while !(seen_src && seen_dest) {
        let change = rx.recv_timeout(NOTIFY_WINDOW).expect("notification");
        seen_src |= change.path == src_dir;
        seen_dest |= change.path == dest_dir;
    }
}

// =============================================================================
// Folder Picker
// =============================================================================

#[test]
fn test_cancelled_dialog_is_no_selection() {
    assert_eq!(bridge().open_folder_dialog().unwrap(), None);
}
