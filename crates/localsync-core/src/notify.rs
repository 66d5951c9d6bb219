//! Notification queues feeding the change detector.

use std::collections::VecDeque;

use crate::node::NodeId;

/// Which queue a notification goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyQueue {
    /// Paths reported by the watcher or the scanner; checked right away
    DirEvents,
    /// Paths that failed transiently; checked again later
    Retry,
}

impl NotifyQueue {
    fn index(self) -> usize {
        match self {
            NotifyQueue::DirEvents => 0,
            NotifyQueue::Retry => 1,
        }
    }

    /// The queue that is not `self`.
    pub fn other(self) -> Self {
        match self {
            NotifyQueue::DirEvents => NotifyQueue::Retry,
            NotifyQueue::Retry => NotifyQueue::DirEvents,
        }
    }
}

/// A path whose state must be re-examined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Node `path` is relative to; `None` means `path` is absolute
    pub origin: Option<NodeId>,
    pub path: String,
}

/// The two ordered notification queues of one sync.
#[derive(Debug, Default)]
pub struct DirNotify {
    queues: [VecDeque<Notification>; 2],
}

impl DirNotify {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&mut self, queue: NotifyQueue, origin: Option<NodeId>, path: impl Into<String>) {
        self.queues[queue.index()].push_back(Notification {
            origin,
            path: path.into(),
        });
    }

    pub fn front(&self, queue: NotifyQueue) -> Option<&Notification> {
        self.queues[queue.index()].front()
    }

    pub fn pop(&mut self, queue: NotifyQueue) -> Option<Notification> {
        self.queues[queue.index()].pop_front()
    }

    pub fn len(&self, queue: NotifyQueue) -> usize {
        self.queues[queue.index()].len()
    }

    pub fn is_empty(&self, queue: NotifyQueue) -> bool {
        self.queues[queue.index()].is_empty()
    }

    /// Both queues empty at the same instant.
    pub fn is_idle(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    pub fn iter(&self, queue: NotifyQueue) -> impl Iterator<Item = &Notification> {
        self.queues[queue.index()].iter()
    }
}
