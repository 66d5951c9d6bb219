//! One local sync: the tree mirror of a root folder, its notification
//! queues and its lifecycle.
//!
//! A `LocalSync` is owned by the caller and operates on a [`SyncContext`]
//! passed into every call. Change detection lives in `checkpath`, queue
//! draining in `queue` and directory enumeration in `scan`.

mod checkpath;
mod queue;
mod scan;

pub use queue::SliceReport;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::{NodeHandle, SyncContext, SyncId};
use crate::events::SyncEvent;
use crate::fs::{FileHandle, FileSystem, FsError, FsId};
use crate::node::{LocalNode, NodeId, NodeKind, RemoteHandle, TransferId};
use crate::notify::DirNotify;
use crate::tree::LocalTree;

/// Lifecycle state of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    InitialScan,
    Active,
    Failed,
    Canceled,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::InitialScan => write!(f, "initial scan"),
            SyncState::Active => write!(f, "active"),
            SyncState::Failed => write!(f, "failed"),
            SyncState::Canceled => write!(f, "canceled"),
        }
    }
}

/// Per-path sync status reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PathState {
    /// Not tracked by this sync
    NotFound,
    /// Has a remote counterpart
    Synced,
    /// An outgoing transfer is in flight
    Syncing,
    /// Tracked, waiting for upload
    Pending,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Cannot open sync root {path}: {source}")]
    RootUnavailable {
        path: String,
        #[source]
        source: FsError,
    },

    #[error("Sync root is not a folder: {0}")]
    RootNotFolder(String),

    #[error("Cannot enumerate sync root {0}")]
    ScanFailed(String),
}

/// Subtree totals used to keep the sync counters in step with the tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    bytes: u64,
    files: u64,
    folders: u64,
}

/// A local sync rooted at one folder.
///
/// Must be torn down with [`LocalSync::close`]: dropping it leaves its
/// identity registrations and registry record behind in the context.
pub struct LocalSync {
    id: SyncId,
    tag: i64,
    state: SyncState,
    tree: LocalTree,
    notify: DirNotify,
    /// Sum of fingerprint sizes of attached file nodes
    local_bytes: u64,
    file_count: u64,
    folder_count: u64,
    /// Completed sweeps
    scan_seqno: u64,
}

impl LocalSync {
    /// Create a sync rooted at `root_path` and register it in `ctx`.
    ///
    /// The new sync starts in [`SyncState::InitialScan`]; call
    /// [`LocalSync::initial_scan`] to enqueue the root's contents.
    pub fn new<F: FileSystem>(
        ctx: &mut SyncContext<F>,
        root_path: &str,
        remote: Option<RemoteHandle>,
        tag: i64,
    ) -> Self {
        let id = ctx.register_sync(root_path, tag);
        let mut tree = LocalTree::new(root_path);
        let root = tree.root();
        if let Some(node) = tree.get_mut(root) {
            node.remote = remote;
        }
        info!("Created sync {} at {}", id, root_path);
        ctx.flag_activity();

        Self {
            id,
            tag,
            state: SyncState::InitialScan,
            tree,
            notify: DirNotify::new(),
            local_bytes: 0,
            file_count: 0,
            folder_count: 1,
            scan_seqno: 0,
        }
    }

    /// Cancel the sync and tear down its tree.
    ///
    /// The state becomes [`SyncState::Canceled`] before anything is removed,
    /// so teardown emits no deletion events.
    pub fn close<F: FileSystem>(mut self, ctx: &mut SyncContext<F>) {
        self.state = SyncState::Canceled;
        for (id, node) in self.tree.iter() {
            if let Some(fsid) = node.fsid {
                ctx.fsids.unregister(fsid, self.handle(id));
            }
        }
        ctx.deregister_sync(self.id);
        ctx.flag_activity();
        info!("Closed sync {} at {}", self.id, self.tree.root_path());
    }

    pub fn id(&self) -> SyncId {
        self.id
    }

    pub fn tag(&self) -> i64 {
        self.tag
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Whether queue processing should continue.
    pub fn is_running(&self) -> bool {
        matches!(self.state, SyncState::InitialScan | SyncState::Active)
    }

    pub fn tree(&self) -> &LocalTree {
        &self.tree
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn root_path(&self) -> &str {
        self.tree.root_path()
    }

    pub fn node(&self, id: NodeId) -> Option<&LocalNode> {
        self.tree.get(id)
    }

    /// Full path of an attached node.
    pub fn path_of<F: FileSystem>(&self, ctx: &SyncContext<F>, id: NodeId) -> Option<String> {
        self.tree.path_of(id, ctx.fs.separator())
    }

    pub fn notify(&self) -> &DirNotify {
        &self.notify
    }

    pub fn notify_mut(&mut self) -> &mut DirNotify {
        &mut self.notify
    }

    pub fn local_bytes(&self) -> u64 {
        self.local_bytes
    }

    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    /// Tracked folders, the root included.
    pub fn folder_count(&self) -> u64 {
        self.folder_count
    }

    pub fn scan_seqno(&self) -> u64 {
        self.scan_seqno
    }

    /// Notify the owner and switch to `new_state`. No-op if unchanged.
    pub fn change_state<F: FileSystem>(&mut self, ctx: &mut SyncContext<F>, new_state: SyncState) {
        if new_state == self.state {
            return;
        }
        ctx.emit(SyncEvent::StateChanged {
            sync: self.id,
            from: self.state,
            to: new_state,
        });
        info!("Sync {} state: {} -> {}", self.id, self.state, new_state);
        self.state = new_state;
    }

    /// Status of `path` as seen by this sync.
    pub fn path_state<F: FileSystem>(&self, ctx: &SyncContext<F>, path: &str) -> PathState {
        let node = self
            .tree
            .resolve(None, path, ctx.fs.separator())
            .node()
            .and_then(|id| self.tree.get(id));
        match node {
            None => PathState::NotFound,
            Some(node) if node.remote.is_some() => PathState::Synced,
            Some(node) if node.transfer.is_some() => PathState::Syncing,
            Some(_) => PathState::Pending,
        }
    }

    /// Record the remote counterpart of a node.
    pub fn set_remote(&mut self, node: NodeId, remote: Option<RemoteHandle>) {
        if let Some(node) = self.tree.get_mut(node) {
            node.remote = remote;
        }
    }

    /// Record (or clear) the outgoing transfer of a node.
    pub fn set_transfer(&mut self, node: NodeId, transfer: Option<TransferId>) {
        if let Some(node) = self.tree.get_mut(node) {
            node.transfer = transfer;
        }
    }

    /// Open the root and enqueue its contents.
    ///
    /// A root that cannot be opened for good, or is not a folder, fails the
    /// sync. A transient failure is returned without changing state.
    pub async fn initial_scan<F: FileSystem>(
        &mut self,
        ctx: &mut SyncContext<F>,
    ) -> Result<(), SyncError> {
        let root_path = self.root_path().to_string();
        let handle = match ctx.fs.open(&root_path).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Sync {} cannot open root {}: {}", self.id, root_path, e);
                if !e.is_transient() {
                    self.change_state(ctx, SyncState::Failed);
                }
                return Err(SyncError::RootUnavailable {
                    path: root_path,
                    source: e,
                });
            }
        };
        let info = handle.info().clone();
        drop(handle);

        if info.kind != NodeKind::Folder {
            self.change_state(ctx, SyncState::Failed);
            return Err(SyncError::RootNotFolder(root_path));
        }
        if !self.scan(ctx, &root_path, &info).await {
            return Err(SyncError::ScanFailed(root_path));
        }
        Ok(())
    }

    fn handle(&self, node: NodeId) -> NodeHandle {
        NodeHandle {
            sync: self.id,
            node,
        }
    }

    /// Give `node` the identity `fsid`, taking it over from any previous owner.
    fn set_fsid<F: FileSystem>(&mut self, ctx: &mut SyncContext<F>, node: NodeId, fsid: FsId) {
        let handle = self.handle(node);
        let Some(current) = self.tree.get(node).and_then(|n| n.fsid) else {
            self.install_fsid(ctx, node, fsid);
            return;
        };
        if current == fsid && ctx.fsids.is_registered(fsid, handle) {
            return;
        }
        ctx.fsids.unregister(current, handle);
        self.install_fsid(ctx, node, fsid);
    }

    fn install_fsid<F: FileSystem>(&mut self, ctx: &mut SyncContext<F>, node: NodeId, fsid: FsId) {
        if let Some(previous) = ctx.fsids.register(fsid, self.handle(node)) {
            // A node of this tree that loses its identity forgets it
            if previous.sync == self.id {
                if let Some(prev) = self.tree.get_mut(previous.node) {
                    prev.fsid = None;
                }
            }
            debug!("Identity {} moved from node {} to {}", fsid, previous.node, node);
        }
        if let Some(n) = self.tree.get_mut(node) {
            n.fsid = Some(fsid);
        }
    }

    fn tally(&self, id: NodeId) -> Tally {
        let mut tally = Tally::default();
        for node in self.tree.subtree(id).into_iter().filter_map(|n| self.tree.get(n)) {
            match node.kind {
                NodeKind::File => {
                    tally.files += 1;
                    tally.bytes += node.size();
                }
                NodeKind::Folder => tally.folders += 1,
            }
        }
        tally
    }

    fn count_in(&mut self, tally: Tally) {
        self.local_bytes += tally.bytes;
        self.file_count += tally.files;
        self.folder_count += tally.folders;
    }

    fn count_out(&mut self, tally: Tally) {
        self.local_bytes = self.local_bytes.saturating_sub(tally.bytes);
        self.file_count = self.file_count.saturating_sub(tally.files);
        self.folder_count = self.folder_count.saturating_sub(tally.folders);
    }

    /// Cut `id` loose from its parent, keeping its identity registration.
    fn detach_node(&mut self, id: NodeId) {
        if !self.tree.is_attached(id) || id == self.tree.root() {
            return;
        }
        let tally = self.tally(id);
        self.tree.detach(id);
        self.count_out(tally);
        if let Some(node) = self.tree.get_mut(id) {
            node.not_seen += 1;
        }
    }

    /// Account for a node the tree detached because another took its name.
    fn displaced(&mut self, occupant: Option<NodeId>) {
        if let Some(id) = occupant {
            debug!("Sync {}: node {} displaced", self.id, id);
            let tally = self.tally(id);
            self.count_out(tally);
            if let Some(node) = self.tree.get_mut(id) {
                node.not_seen += 1;
            }
        }
    }

    /// The entry behind `id` could not be found. Stops its transfer and
    /// advances its not-seen counter, at most once per sweep.
    fn mark_missing<F: FileSystem>(&mut self, ctx: &mut SyncContext<F>, id: NodeId) {
        if id == self.tree.root() {
            warn!("Sync {}: root {} is missing", self.id, self.root_path());
            return;
        }
        let path = self.display_path(ctx, id);
        let seqno = self.scan_seqno;
        let Some(node) = self.tree.get_mut(id) else {
            return;
        };
        if let Some(transfer) = node.transfer.take() {
            ctx.emit(SyncEvent::TransferStopped {
                sync: self.id,
                path: path.clone(),
                transfer,
            });
        }
        if node.missed_seqno == Some(seqno) {
            debug!("Sync {}: {} already missed this sweep", self.id, path);
            return;
        }
        node.not_seen += 1;
        node.missed_seqno = Some(seqno);
        debug!("Sync {}: {} not seen ({})", self.id, path, node.not_seen);
        ctx.flag_activity();
    }

    /// Full path of an attached node, or the bare name of a detached one.
    fn display_path<F: FileSystem>(&self, ctx: &SyncContext<F>, id: NodeId) -> String {
        self.tree
            .path_of(id, ctx.fs.separator())
            .or_else(|| self.tree.get(id).map(|n| n.name.clone()))
            .unwrap_or_default()
    }

    /// Drop `id` and its subtree, releasing identities and transfers.
    ///
    /// Emits [`SyncEvent::LocalDeleted`] for attached nodes unless the sync
    /// is canceled.
    fn remove_node<F: FileSystem>(&mut self, ctx: &mut SyncContext<F>, id: NodeId) {
        let Some(top) = self.tree.get(id) else {
            return;
        };
        let kind = top.kind;
        let remote = top.remote;
        let attached = self.tree.is_attached(id);
        let path = self.display_path(ctx, id);
        if attached {
            let tally = self.tally(id);
            self.count_out(tally);
        }

        let canceled = self.state == SyncState::Canceled;
        for (node_id, node) in self.tree.remove_subtree(id) {
            let handle = self.handle(node_id);
            if let Some(fsid) = node.fsid {
                ctx.fsids.unregister(fsid, handle);
            }
            if let Some(transfer) = node.transfer {
                if !canceled {
                    ctx.emit(SyncEvent::TransferStopped {
                        sync: self.id,
                        path: path.clone(),
                        transfer,
                    });
                }
            }
            ctx.forget_added(handle);
        }

        if attached && !canceled {
            info!("Sync {}: {} {} deleted", self.id, kind, path);
            ctx.emit(SyncEvent::LocalDeleted {
                sync: self.id,
                path,
                kind,
                remote,
            });
        }
        ctx.flag_activity();
    }
}
