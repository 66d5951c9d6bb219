//! localsync-core: local half of a file sync engine.
//!
//! This crate provides:
//! - An in-memory mirror of a local directory subtree (`LocalTree`)
//! - Change detection for single paths: additions, content changes, moves
//!   and deletions (`LocalSync::check_path`)
//! - Notification queues drained in bounded slices (`LocalSync::process_queue`)
//! - FileSystem and SyncFilter trait abstractions

pub mod config;
pub mod context;
pub mod events;
pub mod filter;
pub mod fingerprint;
pub mod fs;
pub mod node;
pub mod notify;
pub mod sync;
pub mod tree;

pub use config::{ConfigError, SyncConfig};
pub use context::{FsidIndex, NodeHandle, SyncContext, SyncId, SyncRecord};
pub use events::{EventBus, Subscription, SyncEvent};
pub use filter::{AcceptAll, PatternFilter, SyncFilter};
pub use fingerprint::Fingerprint;
pub use fs::{FileEntry, FileHandle, FileInfo, FileSystem, FsError, FsId, InMemoryFs};
pub use node::{LocalNode, NodeId, NodeKind, RemoteHandle, TransferId};
pub use notify::{DirNotify, Notification, NotifyQueue};
pub use sync::{LocalSync, PathState, SliceReport, SyncError, SyncState};
pub use tree::{LocalTree, Resolution};
