//! Change detection for a single path.

use tracing::{debug, info, warn};

use super::{LocalSync, SyncState};
use crate::context::SyncContext;
use crate::events::SyncEvent;
use crate::fingerprint::Fingerprint;
use crate::fs::{FileHandle, FileInfo, FileSystem};
use crate::node::{LocalNode, NodeId, NodeKind};
use crate::notify::NotifyQueue;
use crate::tree::{Resolution, join_path};

/// A path after resolution against the tree.
struct Target {
    /// How to requeue the path if it must be looked at again
    origin: Option<NodeId>,
    rel_path: String,
    /// Filesystem path to open
    full_path: String,
    /// Tracked node at this path, if any
    existing: Option<NodeId>,
    parent: Option<NodeId>,
    local_name: String,
}

impl LocalSync {
    /// Reconcile the tree with the current on-disk state of `path`.
    ///
    /// `path` is relative to `origin`, or absolute (starting with the root
    /// path) when `origin` is `None`. If only a prefix is tracked, only the
    /// first untracked component is examined.
    ///
    /// Returns the node that was created, moved or refreshed. Existing
    /// folders and every outcome that leaves nothing to report return `None`.
    pub async fn check_path<F: FileSystem>(
        &mut self,
        ctx: &mut SyncContext<F>,
        origin: Option<NodeId>,
        path: &str,
    ) -> Option<NodeId> {
        let sep = ctx.fs.separator().to_string();
        let base = match origin {
            Some(id) => match self.tree.path_of(id, &sep) {
                Some(base) => base,
                None => {
                    debug!("Sync {}: origin {} is no longer attached", self.id, id);
                    return None;
                }
            },
            None => String::new(),
        };
        let full_path = if path.is_empty() {
            base
        } else {
            join_path(&base, &sep, path)
        };

        let target = match self.tree.resolve(origin, path, &sep) {
            Resolution::Found { node, parent } => Target {
                origin,
                rel_path: path.to_string(),
                full_path,
                existing: Some(node),
                parent,
                local_name: self.tree.get(node)?.local_name.clone(),
            },
            Resolution::Partial { parent, residual } => match residual.find(sep.as_str()) {
                None => Target {
                    origin,
                    rel_path: path.to_string(),
                    full_path,
                    existing: None,
                    parent: Some(parent),
                    local_name: residual,
                },
                Some(pos) => {
                    let first = residual[..pos].to_string();
                    let parent_path = self.tree.path_of(parent, &sep)?;
                    Target {
                        origin,
                        rel_path: path.to_string(),
                        full_path: join_path(&parent_path, &sep, &first),
                        existing: None,
                        parent: Some(parent),
                        local_name: first,
                    }
                }
            },
            Resolution::NoMatch => {
                debug!("Sync {}: {} is outside the tree", self.id, full_path);
                return None;
            }
        };

        self.reconcile(ctx, target).await
    }

    /// Like [`LocalSync::check_path`] for an entry named `local_name`
    /// directly under `parent`, whose full path is already known.
    pub async fn check_path_named<F: FileSystem>(
        &mut self,
        ctx: &mut SyncContext<F>,
        parent: NodeId,
        full_path: &str,
        local_name: &str,
    ) -> Option<NodeId> {
        if !self.tree.is_attached(parent) {
            debug!("Sync {}: parent {} is no longer attached", self.id, parent);
            return None;
        }
        let existing = self.tree.get(parent)?.child(local_name);
        let target = Target {
            origin: Some(parent),
            rel_path: local_name.to_string(),
            full_path: full_path.to_string(),
            existing,
            parent: Some(parent),
            local_name: local_name.to_string(),
        };
        self.reconcile(ctx, target).await
    }

    async fn reconcile<F: FileSystem>(
        &mut self,
        ctx: &mut SyncContext<F>,
        target: Target,
    ) -> Option<NodeId> {
        let sep = ctx.fs.separator().to_string();
        let is_root = target.existing == Some(self.tree.root());

        let mut local_name = target.local_name.clone();
        if !is_root {
            let name = ctx.fs.local_to_name(&local_name);
            let parent_path = target
                .parent
                .and_then(|p| self.tree.path_of(p, &sep))
                .unwrap_or_default();
            if !ctx.filter.is_syncable(&name, &parent_path, &mut local_name) {
                debug!("Sync {}: {} is excluded", self.id, target.full_path);
                return None;
            }
        }

        let mut handle = match ctx.fs.open(&target.full_path).await {
            Ok(handle) => handle,
            Err(e) if e.is_transient() => {
                debug!("Sync {}: {} busy, retrying later", self.id, target.full_path);
                self.notify
                    .notify(NotifyQueue::Retry, target.origin, target.rel_path.clone());
                return None;
            }
            Err(e) => {
                debug!("Sync {}: cannot open {}: {}", self.id, target.full_path, e);
                if let Some(id) = target.existing {
                    self.mark_missing(ctx, id);
                }
                return None;
            }
        };
        let info = handle.info().clone();

        if is_root {
            if info.kind == NodeKind::File {
                warn!("Sync {}: root {} is a file", self.id, target.full_path);
                self.change_state(ctx, SyncState::Failed);
            }
            return None;
        }
        let parent = target.parent?;

        let mut node = target.existing;
        if let Some(id) = node {
            if self.is_replaced(ctx, id, &info) {
                info!("Sync {}: {} was replaced", self.id, target.full_path);
                self.detach_node(id);
                node = None;
            } else {
                if let Some(fsid) = info.fsid {
                    self.set_fsid(ctx, id, fsid);
                }
                let seqno = self.scan_seqno;
                if let Some(n) = self.tree.get_mut(id) {
                    n.not_seen = 0;
                    n.missed_seqno = None;
                    n.scan_seqno = seqno;
                }
            }
        }

        let mut is_new = false;
        let id = match node {
            Some(id) => id,
            None => match self.moved_node(ctx, parent, &info) {
                Some(source) => {
                    self.apply_move(ctx, source, parent, local_name);
                    source
                }
                None => {
                    is_new = true;
                    self.create_node(ctx, parent, local_name, &info)
                }
            },
        };

        match info.kind {
            NodeKind::Folder => {
                if !is_new {
                    return None;
                }
                if !self.scan(ctx, &target.full_path, &info).await {
                    warn!("Sync {}: cannot enumerate new folder {}", self.id, target.full_path);
                }
                let path = self.display_path(ctx, id);
                info!("Sync {}: new folder {}", self.id, path);
                ctx.emit(SyncEvent::LocalFolderAdded {
                    sync: self.id,
                    path,
                });
                ctx.mark_added(self.handle(id));
                ctx.flag_activity();
                Some(id)
            }
            NodeKind::File => {
                self.refresh_file(ctx, id, is_new, &mut handle, &target)
                    .await
            }
        }
    }

    /// Whether the tracked node `id` no longer describes the entry at its path.
    ///
    /// A different kind always counts. For files, an identity that differs
    /// from the one the node still holds means the file was overwritten by a
    /// new one. Folders are never invalidated by identity.
    fn is_replaced<F: FileSystem>(&self, ctx: &SyncContext<F>, id: NodeId, info: &FileInfo) -> bool {
        let Some(node) = self.tree.get(id) else {
            return false;
        };
        if node.kind != info.kind {
            return true;
        }
        match (node.kind, node.fsid, info.fsid) {
            (NodeKind::File, Some(known), Some(seen)) => {
                known != seen && ctx.fsids.is_registered(known, self.handle(id))
            }
            _ => false,
        }
    }

    /// A node of this tree that owns the entry's identity and may be moved
    /// under `parent`.
    fn moved_node<F: FileSystem>(
        &self,
        ctx: &SyncContext<F>,
        parent: NodeId,
        info: &FileInfo,
    ) -> Option<NodeId> {
        let fsid = info.fsid?;
        let owner = ctx.fsids.get(fsid)?;
        if owner.sync != self.id {
            debug!("Sync {}: identity {} belongs to sync {}", self.id, fsid, owner.sync);
            return None;
        }
        let node = self.tree.get(owner.node)?;
        if node.kind != info.kind || owner.node == self.tree.root() {
            return None;
        }
        if self.tree.is_ancestor_or_self(owner.node, parent) {
            debug!("Sync {}: node {} cannot move below itself", self.id, owner.node);
            return None;
        }
        Some(owner.node)
    }

    fn apply_move<F: FileSystem>(
        &mut self,
        ctx: &mut SyncContext<F>,
        source: NodeId,
        parent: NodeId,
        local_name: String,
    ) {
        let Some(node) = self.tree.get(source) else {
            return;
        };
        let from = node.name.clone();
        let remote = node.remote;
        let name = ctx.fs.local_to_name(&local_name);
        let alias = ctx.fs.alias_name(&local_name).filter(|a| *a != local_name);

        let reattached = (!self.tree.is_attached(source)).then(|| self.tally(source));
        let displaced = self
            .tree
            .set_name_parent(source, parent, local_name, name, alias);
        self.displaced(displaced);
        if let Some(tally) = reattached {
            self.count_in(tally);
        }

        let seqno = self.scan_seqno;
        if let Some(n) = self.tree.get_mut(source) {
            n.not_seen = 0;
            n.missed_seqno = None;
            n.scan_seqno = seqno;
        }

        let to = self.display_path(ctx, source);
        info!("Sync {}: moved {} -> {}", self.id, from, to);
        ctx.emit(SyncEvent::LocalMove {
            sync: self.id,
            from,
            to,
            remote,
        });
        ctx.flag_activity();
    }

    fn create_node<F: FileSystem>(
        &mut self,
        ctx: &mut SyncContext<F>,
        parent: NodeId,
        local_name: String,
        info: &FileInfo,
    ) -> NodeId {
        let name = ctx.fs.local_to_name(&local_name);
        let alias = ctx.fs.alias_name(&local_name).filter(|a| *a != local_name);
        let mut node = LocalNode::new(info.kind, name, local_name, alias);
        node.scan_seqno = self.scan_seqno;

        let (id, displaced) = self.tree.insert(parent, node);
        self.displaced(displaced);
        match info.kind {
            NodeKind::File => self.file_count += 1,
            NodeKind::Folder => self.folder_count += 1,
        }
        if let Some(fsid) = info.fsid {
            self.set_fsid(ctx, id, fsid);
        }
        id
    }

    /// Bring the fingerprint of file `id` up to date and report additions
    /// and content changes.
    async fn refresh_file<F: FileSystem>(
        &mut self,
        ctx: &mut SyncContext<F>,
        id: NodeId,
        is_new: bool,
        handle: &mut F::Handle,
        target: &Target,
    ) -> Option<NodeId> {
        let node = self.tree.get_mut(id)?;
        let first = node.fingerprint.is_none();
        let old_size = node.size();
        let result = Fingerprint::refresh(&mut node.fingerprint, handle, &ctx.config).await;
        let new_size = node.size();
        self.local_bytes = self.local_bytes.saturating_sub(old_size) + new_size;

        let changed = match result {
            Ok(changed) => changed,
            Err(e) => {
                warn!("Sync {}: cannot fingerprint {}: {}", self.id, target.full_path, e);
                self.notify
                    .notify(NotifyQueue::Retry, target.origin, target.rel_path.clone());
                return None;
            }
        };

        let path = self.display_path(ctx, id);
        let event = if is_new || first {
            info!("Sync {}: new file {}", self.id, path);
            Some(SyncEvent::LocalFileAdded {
                sync: self.id,
                path,
            })
        } else if changed {
            info!("Sync {}: file changed {}", self.id, path);
            Some(SyncEvent::LocalFileChanged {
                sync: self.id,
                path,
            })
        } else {
            None
        };

        if let Some(event) = event {
            ctx.emit(event);
            ctx.mark_added(self.handle(id));
            ctx.flag_activity();
        }
        Some(id)
    }
}
