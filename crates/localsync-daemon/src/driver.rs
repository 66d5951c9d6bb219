//! Drives every configured sync: feeds watcher events into the queues and
//! interleaves queue slices so no single sync starves the others.

use anyhow::{Result, anyhow};
use localsync_core::{
    LocalSync, NotifyQueue, PatternFilter, SliceReport, Subscription, SyncContext, SyncId,
    SyncState,
};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::native_fs::NativeFs;
use crate::watcher::{FileWatcher, WatchEvent};

struct Entry {
    sync: LocalSync,
    /// The root was busy during the initial scan; try again on the retry tick
    needs_scan: bool,
}

/// Counters of one sync, as printed by `--once`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub id: SyncId,
    pub root: String,
    pub tag: i64,
    pub state: SyncState,
    pub files: u64,
    pub folders: u64,
    pub bytes: u64,
    pub sweeps: u64,
}

pub struct Driver {
    ctx: SyncContext<NativeFs>,
    entries: Vec<Entry>,
    roots: Vec<(PathBuf, i64)>,
    retry_interval: Duration,
    idle: Duration,
    _events: Subscription,
}

impl Driver {
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        let fs = NativeFs::new().with_case_fold_aliases(config.case_fold_aliases);
        let ctx = SyncContext::new(fs, config.sync.clone())
            .map_err(|e| anyhow!("Invalid sync configuration: {}", e))?
            .with_filter(PatternFilter::new(&config.exclude, config.skip_hidden));
        let events = ctx
            .events()
            .subscribe(|event| debug!("Sync event: {:?}", event));

        // A root that cannot be resolved is kept as given; its initial scan fails the sync
        let roots = config
            .roots
            .iter()
            .map(|root| {
                let path = root.path.canonicalize().unwrap_or_else(|_| root.path.clone());
                (path, root.tag)
            })
            .collect();

        Ok(Self {
            ctx,
            entries: Vec::new(),
            roots,
            retry_interval: config.retry_interval(),
            idle: config.idle(),
            _events: events,
        })
    }

    /// Canonical root folders, in configuration order.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|(path, _)| path.clone()).collect()
    }

    pub fn context(&self) -> &SyncContext<NativeFs> {
        &self.ctx
    }

    pub fn syncs(&self) -> impl Iterator<Item = &LocalSync> {
        self.entries.iter().map(|entry| &entry.sync)
    }

    /// Create a sync per root and enqueue each root's contents.
    ///
    /// On error every sync created so far is closed again.
    pub async fn start(&mut self) -> Result<()> {
        let result = self.start_syncs().await;
        if result.is_err() {
            for entry in self.entries.drain(..) {
                entry.sync.close(&mut self.ctx);
            }
        }
        result
    }

    async fn start_syncs(&mut self) -> Result<()> {
        for (path, tag) in &self.roots {
            let root = path
                .to_str()
                .ok_or_else(|| anyhow!("Sync root is not valid UTF-8: {:?}", path))?;
            let sync = LocalSync::new(&mut self.ctx, root, None, *tag);
            let mut entry = Entry {
                sync,
                needs_scan: true,
            };
            Self::scan_root(&mut self.ctx, &mut entry).await;
            self.entries.push(entry);
        }
        Ok(())
    }

    async fn scan_root(ctx: &mut SyncContext<NativeFs>, entry: &mut Entry) {
        let sync = &mut entry.sync;
        match sync.initial_scan(ctx).await {
            Ok(()) => {
                entry.needs_scan = false;
                info!(
                    "Sync {} scanning {} ({} entries queued)",
                    sync.id(),
                    sync.root_path(),
                    sync.notify().len(NotifyQueue::DirEvents)
                );
                // An empty root has nothing to sweep
                if sync.notify().is_idle() {
                    sync.change_state(ctx, SyncState::Active);
                }
            }
            Err(e) if sync.is_running() => {
                warn!("Sync {}: {} (will retry)", sync.id(), e);
            }
            Err(e) => {
                entry.needs_scan = false;
                error!("Sync {} failed: {}", sync.id(), e);
            }
        }
    }

    fn after_slice(ctx: &mut SyncContext<NativeFs>, entry: &mut Entry, report: SliceReport) {
        let sync = &mut entry.sync;
        if report.sweep_completed && sync.state() == SyncState::InitialScan {
            info!(
                "Sync {} initial scan complete: {} files, {} folders, {} bytes",
                sync.id(),
                sync.file_count(),
                sync.folder_count(),
                sync.local_bytes()
            );
            sync.change_state(ctx, SyncState::Active);
        }
    }

    /// Queue a path reported for the root at `root` (index into [`Driver::roots`]).
    pub fn notify_path(&mut self, root: usize, path: impl Into<String>) {
        if let Some(entry) = self.entries.get_mut(root) {
            if entry.sync.is_running() {
                entry
                    .sync
                    .notify_mut()
                    .notify(NotifyQueue::DirEvents, None, path);
            }
        }
    }

    fn dispatch(&mut self, event: WatchEvent) {
        self.notify_path(event.root, event.path);
    }

    /// Run one slice of the directory-events queue of every running sync.
    /// Returns whether any of them has more to do.
    pub async fn run_slice(&mut self) -> bool {
        let mut busy = false;
        for entry in &mut self.entries {
            if !entry.sync.is_running() {
                continue;
            }
            let report = entry
                .sync
                .process_queue(&mut self.ctx, NotifyQueue::DirEvents)
                .await;
            Self::after_slice(&mut self.ctx, entry, report);
            busy |= report.has_more();
        }
        busy
    }

    /// Run one slice of the retry queue of every running sync.
    pub async fn run_retry(&mut self) {
        for entry in &mut self.entries {
            if !entry.sync.is_running() {
                continue;
            }
            if entry.needs_scan {
                Self::scan_root(&mut self.ctx, entry).await;
                continue;
            }
            if entry.sync.notify().is_empty(NotifyQueue::Retry) {
                continue;
            }
            let report = entry
                .sync
                .process_queue(&mut self.ctx, NotifyQueue::Retry)
                .await;
            Self::after_slice(&mut self.ctx, entry, report);
        }
    }

    fn pending(&self, queue: NotifyQueue) -> bool {
        self.entries.iter().any(|entry| {
            entry.sync.is_running()
                && (!entry.sync.notify().is_empty(queue)
                    || (queue == NotifyQueue::Retry && entry.needs_scan))
        })
    }

    /// Process until every queue is empty, waiting the retry interval
    /// between retry slices.
    pub async fn settle(&mut self) {
        loop {
            if self.run_slice().await || self.pending(NotifyQueue::DirEvents) {
                continue;
            }
            if self.pending(NotifyQueue::Retry) {
                tokio::time::sleep(self.retry_interval).await;
                self.run_retry().await;
                continue;
            }
            break;
        }
        self.log_added();
    }

    fn log_added(&mut self) {
        let added = self.ctx.take_added();
        if !added.is_empty() {
            debug!("{} nodes added or changed", added.len());
        }
    }

    /// Main loop: runs until `shutdown` resolves.
    pub async fn run(&mut self, watcher: &mut FileWatcher, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut retry = tokio::time::interval(self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let busy = self.run_slice().await;
            let activity = self.ctx.take_activity();
            if activity {
                self.log_added();
            }
            let pause = if busy || activity {
                Duration::ZERO
            } else {
                self.idle
            };

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(event) = watcher.recv() => {
                    self.dispatch(event);
                    while let Some(event) = watcher.try_recv() {
                        self.dispatch(event);
                    }
                }

                _ = retry.tick() => {
                    self.run_retry().await;
                }

                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    pub fn summary(&self) -> Vec<SyncSummary> {
        self.entries
            .iter()
            .map(|entry| {
                let sync = &entry.sync;
                SyncSummary {
                    id: sync.id(),
                    root: sync.root_path().to_string(),
                    tag: sync.tag(),
                    state: sync.state(),
                    files: sync.file_count(),
                    folders: sync.folder_count(),
                    bytes: sync.local_bytes(),
                    sweeps: sync.scan_seqno(),
                }
            })
            .collect()
    }

    /// Cancel and tear down every sync.
    pub fn shutdown(self) {
        let Driver {
            mut ctx, entries, ..
        } = self;
        for entry in entries {
            entry.sync.close(&mut ctx);
        }
    }
}
