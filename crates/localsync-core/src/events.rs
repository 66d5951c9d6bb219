//! Event infrastructure for localsync-core.
//!
//! `SyncEvent` carries every observable outcome of change detection (state
//! transitions, local additions, changes, moves, deletions, stopped
//! transfers) to the application layer. `EventBus` delivers them
//! synchronously, in emission order, to every subscriber.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::context::SyncId;
use crate::node::{NodeKind, RemoteHandle, TransferId};
use crate::sync::SyncState;

/// Events emitted while reconciling a local tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A sync is about to change state. Emitted before the new state is stored.
    StateChanged {
        sync: SyncId,
        from: SyncState,
        to: SyncState,
    },
    /// A tracked entry was renamed or moved.
    LocalMove {
        sync: SyncId,
        /// Display name of the entry before the move
        from: String,
        /// New full path
        to: String,
        /// Remote counterpart that should follow the move
        remote: Option<RemoteHandle>,
    },
    /// A new folder was found and scanned.
    LocalFolderAdded { sync: SyncId, path: String },
    /// A new file was found.
    LocalFileAdded { sync: SyncId, path: String },
    /// A tracked file's fingerprint changed.
    LocalFileChanged { sync: SyncId, path: String },
    /// A tracked entry was confirmed gone and removed from the tree.
    LocalDeleted {
        sync: SyncId,
        path: String,
        kind: NodeKind,
        remote: Option<RemoteHandle>,
    },
    /// An outgoing transfer was stopped because its source vanished.
    TransferStopped {
        sync: SyncId,
        path: String,
        transfer: TransferId,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Clone the callback list so a callback may subscribe without deadlocking.
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }

    /// Subscribe a collector that records every event, for inspection.
    pub fn record(self: &Arc<Self>) -> (Subscription, Arc<RwLock<Vec<SyncEvent>>>) {
        let log = Arc::new(RwLock::new(Vec::new()));
        let sink = Arc::clone(&log);
        let subscription = self.subscribe(move |event| {
            sink.write()
                .unwrap_or_else(|e| e.into_inner())
                .push(event.clone());
        });
        (subscription, log)
    }
}
