//! localsync-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod driver;
pub mod native_fs;
pub mod watcher;

// Re-export key types for convenience
pub use config::{DaemonConfig, RootConfig};
pub use driver::{Driver, SyncSummary};
pub use native_fs::NativeFs;
pub use watcher::{FileWatcher, WatchEvent};
