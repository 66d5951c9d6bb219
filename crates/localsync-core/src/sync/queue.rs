//! Draining the notification queues and sweep completion.

use tracing::{debug, info};

use super::LocalSync;
use crate::context::SyncContext;
use crate::fs::FileSystem;
use crate::node::{NodeId, NodeKind};
use crate::notify::NotifyQueue;

/// Outcome of one [`LocalSync::process_queue`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceReport {
    /// Notifications taken off the queue
    pub processed: usize,
    /// Notifications left in the processed queue
    pub remaining: usize,
    /// Both queues were drained and the sweep counter advanced
    pub sweep_completed: bool,
}

impl SliceReport {
    pub fn has_more(&self) -> bool {
        self.remaining > 0
    }
}

impl LocalSync {
    /// Process notifications from `queue` in order.
    ///
    /// Returns after the first entry that yields a file node, so hashing
    /// large trees is spread over many calls. When this call leaves both
    /// queues empty, a sweep is complete: the sweep counter advances and
    /// nodes missing for long enough are removed.
    pub async fn process_queue<F: FileSystem>(
        &mut self,
        ctx: &mut SyncContext<F>,
        queue: NotifyQueue,
    ) -> SliceReport {
        let mut report = SliceReport::default();
        while self.is_running() {
            let Some(notification) = self.notify.pop(queue) else {
                break;
            };
            report.processed += 1;
            let result = self
                .check_path(ctx, notification.origin, &notification.path)
                .await;
            let yielded = result
                .and_then(|id| self.tree.get(id))
                .is_some_and(|node| node.kind == NodeKind::File);
            if yielded {
                break;
            }
        }

        report.remaining = self.notify.len(queue);
        if report.remaining > 0 {
            ctx.flag_activity();
        } else if report.processed > 0 && self.notify.is_empty(queue.other()) && self.is_running() {
            self.scan_seqno += 1;
            report.sweep_completed = true;
            debug!("Sync {}: sweep {} complete", self.id, self.scan_seqno);
            self.complete_sweep(ctx);
        }
        report
    }

    /// Age detached nodes, delete nodes missing for `deletion_threshold`
    /// sweeps and queue the rest of the missing nodes for another look.
    fn complete_sweep<F: FileSystem>(&mut self, ctx: &mut SyncContext<F>) {
        let threshold = ctx.config.deletion_threshold;
        let sep = ctx.fs.separator().to_string();

        let mut doomed = Vec::new();
        let detached: Vec<NodeId> = self.tree.detached().collect();
        for id in detached {
            if let Some(node) = self.tree.get_mut(id) {
                node.not_seen += 1;
                if node.not_seen >= threshold {
                    doomed.push(id);
                }
            }
        }

        let mut recheck = Vec::new();
        for (id, node) in self.tree.iter() {
            if node.not_seen == 0 || !self.tree.is_attached(id) {
                continue;
            }
            if node.not_seen >= threshold {
                doomed.push(id);
            } else {
                recheck.push(id);
            }
        }

        // Deleting a folder takes its subtree along
        let roots: Vec<NodeId> = doomed
            .iter()
            .copied()
            .filter(|id| {
                !doomed
                    .iter()
                    .any(|other| other != id && self.tree.is_ancestor_or_self(*other, *id))
            })
            .collect();
        if !roots.is_empty() {
            info!("Sync {}: removing {} missing entries", self.id, roots.len());
        }
        for id in roots {
            self.remove_node(ctx, id);
        }

        for id in recheck {
            if let Some(path) = self.tree.path_of(id, &sep) {
                self.notify.notify(NotifyQueue::Retry, None, path);
            }
        }
        if !self.notify.is_idle() {
            ctx.flag_activity();
        }
    }
}
