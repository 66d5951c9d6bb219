//! Syncability predicate deciding which entries are tracked at all.

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;

/// Decides whether a named entry is tracked.
///
/// `local_name` is the raw on-disk name and may be rewritten; the rewritten
/// form is what gets stored and enqueued.
pub trait SyncFilter: Send + Sync {
    fn is_syncable(&self, name: &str, parent_path: &str, local_name: &mut String) -> bool;
}

/// Tracks everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SyncFilter for AcceptAll {
    fn is_syncable(&self, _name: &str, _parent_path: &str, _local_name: &mut String) -> bool {
        true
    }
}

/// Skips hidden entries and names matching any exclusion glob.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    exclude: GlobSet,
    skip_hidden: bool,
}

impl PatternFilter {
    /// Build a filter from glob patterns. Invalid patterns are logged and skipped.
    pub fn new<S: AsRef<str>>(exclude: &[S], skip_hidden: bool) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude {
            match Glob::new(pattern.as_ref()) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => warn!("Ignoring invalid exclude pattern {:?}: {}", pattern.as_ref(), e),
            }
        }
        let exclude = builder.build().unwrap_or_else(|e| {
            warn!("Failed to compile exclude patterns: {}", e);
            GlobSet::empty()
        });
        Self {
            exclude,
            skip_hidden,
        }
    }
}

impl SyncFilter for PatternFilter {
    fn is_syncable(&self, name: &str, _parent_path: &str, _local_name: &mut String) -> bool {
        if self.skip_hidden && name.starts_with('.') {
            return false;
        }
        !self.exclude.is_match(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(filter: &dyn SyncFilter, name: &str) -> bool {
        let mut local = name.to_string();
        filter.is_syncable(name, "/sync", &mut local)
    }

    #[test]
    fn test_accept_all() {
        assert!(check(&AcceptAll, ".hidden"));
        assert!(check(&AcceptAll, "file.txt"));
    }

    #[test]
    fn test_pattern_filter_excludes_globs_and_hidden() {
        let filter = PatternFilter::new(&["*.tmp", "~$*"], true);
        assert!(check(&filter, "notes.md"));
        assert!(!check(&filter, "download.tmp"));
        assert!(!check(&filter, "~$report.docx"));
        assert!(!check(&filter, ".git"));
    }

    #[test]
    fn test_pattern_filter_can_keep_hidden() {
        let filter = PatternFilter::new::<&str>(&[], false);
        assert!(check(&filter, ".config"));
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let filter = PatternFilter::new(&["[", "*.bak"], true);
        assert!(!check(&filter, "x.bak"));
        assert!(check(&filter, "x.txt"));
    }
}
