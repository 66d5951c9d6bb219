//! Tracked entries of the local tree.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::fingerprint::Fingerprint;
use crate::fs::FsId;

/// File or folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    File,
    Folder,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Folder => write!(f, "folder"),
        }
    }
}

/// Index of a node in its tree's arena.
///
/// The generation makes ids of removed nodes stale instead of letting them
/// alias whatever reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Opaque handle of the remote counterpart. The remote tree is owned elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteHandle(pub u64);

/// Opaque id of an in-flight outgoing transfer owned by the transfer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(pub u64);

/// One tracked filesystem entry.
#[derive(Debug, Clone)]
pub struct LocalNode {
    pub kind: NodeKind,
    /// Display name (normalized form of `local_name`)
    pub name: String,
    /// Path fragment below the parent; the full root path for the root
    pub local_name: String,
    /// Secondary key in the parent's alias index
    pub(crate) alias: Option<String>,
    pub(crate) parent: Option<NodeId>,
    /// Primary children index, keyed by `local_name`
    pub(crate) children: HashMap<String, NodeId>,
    /// Alias children index, keyed by `alias`
    pub(crate) alias_children: HashMap<String, NodeId>,
    pub(crate) fsid: Option<FsId>,
    pub remote: Option<RemoteHandle>,
    pub transfer: Option<TransferId>,
    pub fingerprint: Option<Fingerprint>,
    pub not_seen: u32,
    pub scan_seqno: u64,
    /// Sweep in which `not_seen` was last raised
    pub(crate) missed_seqno: Option<u64>,
}

impl LocalNode {
    pub(crate) fn new(kind: NodeKind, name: String, local_name: String, alias: Option<String>) -> Self {
        Self {
            kind,
            name,
            local_name,
            alias,
            parent: None,
            children: HashMap::new(),
            alias_children: HashMap::new(),
            fsid: None,
            remote: None,
            transfer: None,
            fingerprint: None,
            not_seen: 0,
            scan_seqno: 0,
            missed_seqno: None,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn fsid(&self) -> Option<FsId> {
        self.fsid
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Tracked size: the fingerprint size for files, 0 otherwise.
    pub fn size(&self) -> u64 {
        match (self.kind, &self.fingerprint) {
            (NodeKind::File, Some(fp)) => fp.size,
            _ => 0,
        }
    }

    /// Look up a child by local name, falling back to the alias index.
    pub fn child(&self, local_name: &str) -> Option<NodeId> {
        self.children
            .get(local_name)
            .or_else(|| self.alias_children.get(local_name))
            .copied()
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.children.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}
