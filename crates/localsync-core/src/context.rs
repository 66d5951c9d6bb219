//! State shared by every sync of one client.
//!
//! The filesystem identity index and the registry of active syncs span all
//! local trees, so they live here and are passed explicitly to every
//! operation that reads or changes them. A context must outlive every sync
//! registered in it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::config::{ConfigError, SyncConfig};
use crate::events::{EventBus, SyncEvent};
use crate::filter::{AcceptAll, SyncFilter};
use crate::fs::{FileSystem, FsId};
use crate::node::NodeId;

/// Identifier of a sync within its context. Increases with creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncId(pub u64);

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node of a particular sync's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeHandle {
    pub sync: SyncId,
    pub node: NodeId,
}

/// Reverse index from filesystem identity to the node that owns it.
///
/// At most one node holds a given identity at any time.
#[derive(Debug, Default)]
pub struct FsidIndex {
    owners: HashMap<FsId, NodeHandle>,
}

impl FsidIndex {
    pub fn get(&self, fsid: FsId) -> Option<NodeHandle> {
        self.owners.get(&fsid).copied()
    }

    /// Install `owner` for `fsid`, returning the previous owner if it was a
    /// different node.
    pub fn register(&mut self, fsid: FsId, owner: NodeHandle) -> Option<NodeHandle> {
        self.owners
            .insert(fsid, owner)
            .filter(|previous| *previous != owner)
    }

    /// Remove the registration, but only if `owner` still holds it.
    pub fn unregister(&mut self, fsid: FsId, owner: NodeHandle) -> bool {
        if self.owners.get(&fsid) == Some(&owner) {
            self.owners.remove(&fsid);
            true
        } else {
            false
        }
    }

    pub fn is_registered(&self, fsid: FsId, owner: NodeHandle) -> bool {
        self.owners.get(&fsid) == Some(&owner)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Registry entry of an active sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRecord {
    pub root_path: String,
    /// Correlation tag supplied by the owner
    pub tag: i64,
}

/// Everything the local syncs of one client share.
pub struct SyncContext<F: FileSystem> {
    pub(crate) fs: F,
    pub(crate) filter: Box<dyn SyncFilter>,
    pub(crate) config: SyncConfig,
    pub(crate) fsids: FsidIndex,
    events: Arc<EventBus>,
    /// Active syncs in creation order
    syncs: BTreeMap<SyncId, SyncRecord>,
    next_sync_id: u64,
    activity: bool,
    /// Nodes added or changed since the last `take_added`
    added: BTreeSet<NodeHandle>,
}

impl<F: FileSystem> SyncContext<F> {
    pub fn new(fs: F, config: SyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            fs,
            filter: Box::new(AcceptAll),
            config,
            fsids: FsidIndex::default(),
            events: Arc::new(EventBus::new()),
            syncs: BTreeMap::new(),
            next_sync_id: 1,
            activity: false,
            added: BTreeSet::new(),
        })
    }

    /// Replace the syncability predicate.
    pub fn with_filter(mut self, filter: impl SyncFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn fsids(&self) -> &FsidIndex {
        &self.fsids
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        self.events.emit(event);
    }

    /// Active syncs in creation order.
    pub fn syncs(&self) -> impl Iterator<Item = (SyncId, &SyncRecord)> {
        self.syncs.iter().map(|(id, record)| (*id, record))
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.len()
    }

    pub(crate) fn register_sync(&mut self, root_path: &str, tag: i64) -> SyncId {
        let id = SyncId(self.next_sync_id);
        self.next_sync_id += 1;
        self.syncs.insert(
            id,
            SyncRecord {
                root_path: root_path.to_string(),
                tag,
            },
        );
        id
    }

    pub(crate) fn deregister_sync(&mut self, id: SyncId) {
        self.syncs.remove(&id);
        self.added.retain(|handle| handle.sync != id);
    }

    pub(crate) fn flag_activity(&mut self) {
        self.activity = true;
    }

    /// Whether any sync needs attention. Clears the flag.
    pub fn take_activity(&mut self) -> bool {
        std::mem::take(&mut self.activity)
    }

    pub(crate) fn mark_added(&mut self, handle: NodeHandle) {
        self.added.insert(handle);
    }

    pub(crate) fn forget_added(&mut self, handle: NodeHandle) {
        self.added.remove(&handle);
    }

    /// Nodes added or changed since the last call.
    pub fn take_added(&mut self) -> BTreeSet<NodeHandle> {
        std::mem::take(&mut self.added)
    }

    pub fn added(&self) -> &BTreeSet<NodeHandle> {
        &self.added
    }
}
