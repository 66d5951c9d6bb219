//! Directory watcher with debouncing for sync roots.
//!
//! Uses notify-debouncer-mini for efficient change detection. Events are not
//! classified here: the change detector opens every reported path and
//! decides for itself what happened.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// A path below one of the watched roots changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Index of the root in the list passed to [`FileWatcher::new`]
    pub root: usize,
    /// Absolute path
    pub path: String,
}

/// Watches every sync root recursively and reports changed paths.
pub struct FileWatcher {
    roots: Vec<PathBuf>,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl FileWatcher {
    /// Start watching `roots`.
    ///
    /// Roots should already be canonical: on macOS, /var/folders/... is
    /// really /private/var/folders/..., and FSEvents reports the real path.
    pub fn new(roots: &[PathBuf], debounce: Duration) -> Result<Self> {
        let roots: Vec<PathBuf> = roots
            .iter()
            .map(|root| root.canonicalize().unwrap_or_else(|_| root.clone()))
            .collect();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let roots_clone = roots.clone();

        let mut debouncer = new_debouncer(
            debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(watch_event) = Self::route(&event.path, &roots_clone) {
                            if event_tx.send(watch_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        for root in &roots {
            // A root that cannot be watched still gets scanned, and fails there if missing
            if let Err(e) = debouncer.watcher().watch(root, RecursiveMode::Recursive) {
                warn!("Cannot watch {:?}: {}", root, e);
            }
        }

        Ok(Self {
            roots,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Assign a changed path to the innermost root containing it.
    fn route(path: &Path, roots: &[PathBuf]) -> Option<WatchEvent> {
        let (root, _) = roots
            .iter()
            .enumerate()
            .filter(|(_, root)| path.starts_with(root))
            .max_by_key(|(_, root)| root.components().count())?;
        let path = path.to_str()?.to_string();
        debug!("Watch event: {}", path);
        Some(WatchEvent { root, path })
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.event_rx.recv().await
    }

    /// Take an event if one is ready.
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}
