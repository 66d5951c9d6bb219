use tracing::{debug, warn};

use super::LocalSync;
use crate::context::SyncContext;
use crate::fs::{FileInfo, FileSystem};
use crate::node::NodeKind;
use crate::notify::NotifyQueue;
use crate::tree::join_path;

impl LocalSync {
    /// Enumerate the folder at `path` and enqueue every syncable entry on the
    /// directory-events queue as an absolute path.
    ///
    /// Nothing is added to the tree here; the entries are reconciled when the
    /// queue is processed. Returns false if `path` is not a folder or cannot
    /// be enumerated.
    pub async fn scan<F: FileSystem>(&mut self, ctx: &SyncContext<F>, path: &str, info: &FileInfo) -> bool {
        if info.kind != NodeKind::Folder {
            return false;
        }
        let entries = match ctx.fs.list(path).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Sync {}: cannot list {}: {}", self.id, path, e);
                return false;
            }
        };

        let sep = ctx.fs.separator();
        let mut queued = 0;
        for entry in entries {
            let mut local_name = entry.name;
            let name = ctx.fs.local_to_name(&local_name);
            if !ctx.filter.is_syncable(&name, path, &mut local_name) {
                debug!("Sync {}: skipping {} in {}", self.id, name, path);
                continue;
            }
            self.notify
                .notify(NotifyQueue::DirEvents, None, join_path(path, sep, &local_name));
            queued += 1;
        }
        debug!("Sync {}: scanned {}, {} entries queued", self.id, path, queued);
        true
    }
}
