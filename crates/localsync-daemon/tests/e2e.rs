//! End-to-end tests for localsync-daemon.
//!
//! Runs the driver against real temporary folders: initial scans, moves and
//! deletions detected through the native filesystem, and the watcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use localsync_core::fs::{FileHandle, FileSystem, FsError};
use localsync_core::{NodeKind, SyncEvent, SyncState};
use localsync_daemon::{DaemonConfig, Driver, FileWatcher, NativeFs, RootConfig};
use tempfile::TempDir;
use tokio::time::timeout;

fn canonical(dir: &TempDir) -> PathBuf {
    dir.path().canonicalize().unwrap()
}

fn config_for(roots: &[&Path]) -> DaemonConfig {
    DaemonConfig {
        roots: roots
            .iter()
            .map(|path| RootConfig {
                path: path.to_path_buf(),
                tag: 0,
            })
            .collect(),
        retry_interval_ms: 10,
        ..DaemonConfig::default()
    }
}

fn path_str(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

async fn started(config: &DaemonConfig) -> Driver {
    let mut driver = Driver::new(config).unwrap();
    driver.start().await.unwrap();
    driver.settle().await;
    driver
}

#[tokio::test]
async fn test_initial_scan_mirrors_directory() {
    let dir = TempDir::new().unwrap();
    let root = canonical(&dir);
    std::fs::create_dir_all(root.join("docs/nested")).unwrap();
    std::fs::write(root.join("a.txt"), "hello").unwrap();
    std::fs::write(root.join("docs/b.txt"), "world!").unwrap();
    std::fs::write(root.join("docs/nested/c.txt"), "").unwrap();
    // Excluded by the default patterns
    std::fs::write(root.join("scratch.tmp"), "ignored").unwrap();
    std::fs::write(root.join(".hidden"), "ignored").unwrap();

    let driver = started(&config_for(&[&root])).await;
    let summary = driver.summary();

    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].state, SyncState::Active);
    assert_eq!(summary[0].files, 3);
    // Root, docs and docs/nested
    assert_eq!(summary[0].folders, 3);
    assert_eq!(summary[0].bytes, 11);
    assert!(summary[0].sweeps >= 1);

    driver.shutdown();
}

#[tokio::test]
async fn test_empty_root_becomes_active() {
    let dir = TempDir::new().unwrap();
    let root = canonical(&dir);

    let driver = started(&config_for(&[&root])).await;
    assert_eq!(driver.summary()[0].state, SyncState::Active);
    assert_eq!(driver.summary()[0].files, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_start_closes_created_syncs() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = TempDir::new().unwrap();
    let root = canonical(&dir);
    std::fs::write(root.join("a.txt"), "a").unwrap();
    let bad = root.join(OsStr::from_bytes(b"bad\xff"));

    let mut driver = Driver::new(&config_for(&[&root, &bad])).unwrap();
    assert!(driver.start().await.is_err());

    assert_eq!(driver.syncs().count(), 0);
    assert_eq!(driver.context().sync_count(), 0);
    assert!(driver.context().fsids().is_empty());
}

#[tokio::test]
async fn test_missing_root_fails_sync() {
    let dir = TempDir::new().unwrap();
    let missing = canonical(&dir).join("nope");
    let present = TempDir::new().unwrap();
    let present_root = canonical(&present);
    std::fs::write(present_root.join("a.txt"), "a").unwrap();

    let driver = started(&config_for(&[&missing, &present_root])).await;
    let summary = driver.summary();

    assert_eq!(summary[0].state, SyncState::Failed);
    // The other root is unaffected
    assert_eq!(summary[1].state, SyncState::Active);
    assert_eq!(summary[1].files, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_rename_detected_as_move() {
    let dir = TempDir::new().unwrap();
    let root = canonical(&dir);
    std::fs::write(root.join("a.txt"), "content").unwrap();

    let mut driver = started(&config_for(&[&root])).await;
    let (_subscription, log) = driver.context().events().record();

    std::fs::rename(root.join("a.txt"), root.join("b.txt")).unwrap();
    driver.notify_path(0, path_str(&root.join("b.txt")));
    driver.notify_path(0, path_str(&root.join("a.txt")));
    driver.settle().await;

    let events = log.read().unwrap().clone();
    assert!(
        events.iter().any(|e| matches!(
            e,
            SyncEvent::LocalMove { from, to, .. } if from == "a.txt" && to.ends_with("b.txt")
        )),
        "expected a move, got {:?}",
        events
    );
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, SyncEvent::LocalDeleted { .. } | SyncEvent::LocalFileAdded { .. })),
        "a rename is neither a deletion nor an addition: {:?}",
        events
    );
    assert_eq!(driver.summary()[0].files, 1);
}

#[tokio::test]
async fn test_deletion_confirmed_after_retries() {
    let dir = TempDir::new().unwrap();
    let root = canonical(&dir);
    std::fs::create_dir(root.join("docs")).unwrap();
    std::fs::write(root.join("docs/a.txt"), "aaaa").unwrap();
    std::fs::write(root.join("keep.txt"), "k").unwrap();

    let mut driver = started(&config_for(&[&root])).await;
    let (_subscription, log) = driver.context().events().record();

    std::fs::remove_dir_all(root.join("docs")).unwrap();
    driver.notify_path(0, path_str(&root.join("docs")));
    driver.settle().await;

    let events = log.read().unwrap().clone();
    let deleted: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::LocalDeleted { path, kind, .. } => Some((path.clone(), *kind)),
            _ => None,
        })
        .collect();
    // Only the topmost vanished entry is reported
    assert_eq!(deleted.len(), 1, "{:?}", events);
    assert!(deleted[0].0.ends_with("docs"));
    assert_eq!(deleted[0].1, NodeKind::Folder);

    let summary = &driver.summary()[0];
    assert_eq!(summary.files, 1);
    assert_eq!(summary.folders, 1);
    assert_eq!(summary.bytes, 1);
}

#[tokio::test]
async fn test_content_change_reported() {
    let dir = TempDir::new().unwrap();
    let root = canonical(&dir);
    std::fs::write(root.join("a.txt"), "v1").unwrap();

    let mut driver = started(&config_for(&[&root])).await;
    let (_subscription, log) = driver.context().events().record();

    std::fs::write(root.join("a.txt"), "version two").unwrap();
    driver.notify_path(0, path_str(&root.join("a.txt")));
    driver.settle().await;

    let events = log.read().unwrap().clone();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SyncEvent::LocalFileChanged { path, .. } if path.ends_with("a.txt"))),
        "{:?}",
        events
    );
    assert_eq!(driver.summary()[0].bytes, 11);
}

#[tokio::test]
async fn test_shutdown_cancels_without_events() {
    let dir = TempDir::new().unwrap();
    let root = canonical(&dir);
    std::fs::write(root.join("a.txt"), "a").unwrap();

    let driver = started(&config_for(&[&root])).await;
    let (_subscription, log) = driver.context().events().record();
    driver.shutdown();

    assert!(log.read().unwrap().is_empty());
}

#[tokio::test]
async fn test_native_fs_open_and_read() {
    let dir = TempDir::new().unwrap();
    let root = canonical(&dir);
    std::fs::write(root.join("data.bin"), b"0123456789").unwrap();
    let fs = NativeFs::new();

    let mut handle = fs.open(&path_str(&root.join("data.bin"))).await.unwrap();
    assert_eq!(handle.info().kind, NodeKind::File);
    assert_eq!(handle.info().size, 10);
    assert_eq!(handle.read_at(3, 4).await.unwrap(), b"3456");
    // Short read at the end of the file
    assert_eq!(handle.read_at(8, 10).await.unwrap(), b"89");

    let folder = fs.open(&path_str(&root)).await.unwrap();
    assert_eq!(folder.info().kind, NodeKind::Folder);
    assert_eq!(folder.info().size, 0);

    let entries = fs.list(&path_str(&root)).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "data.bin");
    assert!(!entries[0].is_dir);
}

#[tokio::test]
async fn test_native_fs_missing_is_permanent() {
    let dir = TempDir::new().unwrap();
    let fs = NativeFs::new();

    let result = fs.open(&path_str(&canonical(&dir).join("gone"))).await;
    match result {
        Err(err @ FsError::NotFound(_)) => assert!(!err.is_transient()),
        Err(other) => panic!("expected NotFound, got {:?}", other),
        Ok(_) => panic!("expected an error"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_native_fs_identity_survives_rename() {
    let dir = TempDir::new().unwrap();
    let root = canonical(&dir);
    std::fs::write(root.join("a.txt"), "x").unwrap();
    let fs = NativeFs::new();

    let before = fs.open(&path_str(&root.join("a.txt"))).await.unwrap();
    let before = before.info().fsid;
    std::fs::rename(root.join("a.txt"), root.join("b.txt")).unwrap();
    let after = fs.open(&path_str(&root.join("b.txt"))).await.unwrap();

    assert!(before.is_some());
    assert_eq!(before, after.info().fsid);
}

#[tokio::test]
async fn test_watcher_reports_changes() {
    let dir = TempDir::new().unwrap();
    let root = canonical(&dir);
    let mut watcher = FileWatcher::new(&[root.clone()], Duration::from_millis(50)).unwrap();

    // Give the backend a moment to register the watch
    tokio::time::sleep(Duration::from_millis(500)).await;
    std::fs::write(root.join("new.txt"), "hello").unwrap();

    let expected = path_str(&root.join("new.txt"));
    let found = timeout(Duration::from_secs(10), async {
        while let Some(event) = watcher.recv().await {
            if event.path == expected {
                return Some(event);
            }
        }
        None
    })
    .await
    .expect("timed out waiting for watch event");

    let event = found.unwrap();
    assert_eq!(event.root, 0);
}
