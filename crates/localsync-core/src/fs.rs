//! FileSystem trait abstraction for the local tree's view of the disk.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in localsync-daemon) - Uses tokio::fs
//!
//! Paths are plain strings joined with [`FileSystem::separator`]. The change
//! detector never inspects path syntax beyond that separator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;
use thiserror::Error;

use crate::node::NodeKind;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    /// The entry exists but could not be accessed right now (locked, busy,
    /// interrupted). Callers should look at it again later.
    #[error("Temporarily unavailable: {0}")]
    Transient(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl FsError {
    /// Whether the failure may go away on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, FsError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Stable, platform-supplied identity of a file or folder (inode on unix).
///
/// Survives renames, so it is what move detection keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FsId(pub u64);

impl fmt::Display for FsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// What `open` learned about an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// File or folder
    pub kind: NodeKind,
    /// Size in bytes (0 for folders)
    pub size: u64,
    /// Modification time in milliseconds since epoch
    pub mtime_millis: u64,
    /// Stable identity, if the platform supplies one
    pub fsid: Option<FsId>,
}

/// Directory entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Raw local name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// An open file or folder. Dropping the handle releases it.
#[async_trait]
pub trait FileHandle: Send {
    /// Metadata captured at open time.
    fn info(&self) -> &FileInfo;

    /// Read up to `len` bytes starting at `offset`.
    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;
}

/// Filesystem gateway consumed by the local tree.
#[async_trait]
pub trait FileSystem: Send + Sync {
    type Handle: FileHandle;

    /// Path separator token.
    fn separator(&self) -> &str {
        "/"
    }

    /// Convert a raw local name into its display form.
    fn local_to_name(&self, local: &str) -> String {
        local.to_string()
    }

    /// Secondary form of a local name used for alias lookups
    /// (short names, case-folded names). `None` disables the alias.
    fn alias_name(&self, _local: &str) -> Option<String> {
        None
    }

    /// Open (and stat) a path.
    async fn open(&self, path: &str) -> Result<Self::Handle>;

    /// List directory contents
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;
}

#[derive(Debug, Clone)]
struct MemFile {
    content: Vec<u8>,
    mtime: u64,
    fsid: FsId,
}

/// In-memory filesystem for testing.
///
/// Paths are absolute and `/`-separated. Every entry gets a fresh identity
/// on creation; `rename` keeps it, `replace` issues a new one.
pub struct InMemoryFs {
    files: RwLock<HashMap<String, MemFile>>,
    /// Directory path -> identity
    dirs: RwLock<HashMap<String, FsId>>,
    /// Paths whose next opens fail transiently (remaining failure count)
    transient: RwLock<HashMap<String, u32>>,
    /// Paths whose enumeration fails
    unlistable: RwLock<HashSet<String>>,
    next_fsid: RwLock<u64>,
    clock: RwLock<u64>,
    case_fold_aliases: bool,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(HashMap::new()),
            transient: RwLock::new(HashMap::new()),
            unlistable: RwLock::new(HashSet::new()),
            next_fsid: RwLock::new(1000),
            clock: RwLock::new(1),
            case_fold_aliases: false,
        }
    }

    /// Use lowercase names as aliases (case-insensitive volume).
    pub fn with_case_fold_aliases(mut self) -> Self {
        self.case_fold_aliases = true;
        self
    }

    fn normalize_path(path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }

    fn parent_path(path: &str) -> Option<String> {
        let normalized = Self::normalize_path(path);
        match normalized.rfind('/') {
            Some(0) if normalized.len() > 1 => Some("/".to_string()),
            Some(0) | None => None,
            Some(pos) => Some(normalized[..pos].to_string()),
        }
    }

    fn alloc_fsid(&self) -> FsId {
        let mut next = self.next_fsid.write().unwrap_or_else(|e| e.into_inner());
        *next += 1;
        FsId(*next)
    }

    /// Monotonically increasing fake clock so every write changes the mtime.
    fn tick(&self) -> u64 {
        let mut clock = self.clock.write().unwrap_or_else(|e| e.into_inner());
        *clock += 1;
        *clock
    }

    /// Create a directory (and parents if needed).
    pub fn mkdir(&self, path: &str) -> FsId {
        let path = Self::normalize_path(path);
        if let Some(parent) = Self::parent_path(&path) {
            self.mkdir(&parent);
        }
        if let Some(id) = self
            .dirs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&path)
        {
            return *id;
        }
        let id = self.alloc_fsid();
        self.dirs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path, id);
        id
    }

    /// Write file contents. Existing files keep their identity.
    pub fn write(&self, path: &str, content: &[u8]) -> FsId {
        let path = Self::normalize_path(path);
        if let Some(parent) = Self::parent_path(&path) {
            self.mkdir(&parent);
        }
        let mtime = self.tick();
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        match files.get_mut(&path) {
            Some(file) => {
                file.content = content.to_vec();
                file.mtime = mtime;
                file.fsid
            }
            None => {
                let fsid = self.alloc_fsid();
                files.insert(
                    path,
                    MemFile {
                        content: content.to_vec(),
                        mtime,
                        fsid,
                    },
                );
                fsid
            }
        }
    }

    /// Write a file with an explicit identity.
    pub fn write_with_id(&self, path: &str, content: &[u8], fsid: FsId) {
        self.write(path, content);
        self.set_fsid(path, fsid);
    }

    /// Overwrite a file with a brand new one (fresh identity).
    pub fn replace(&self, path: &str, content: &[u8]) -> FsId {
        self.delete(path);
        self.write(path, content)
    }

    /// Force the identity of an existing file or directory.
    pub fn set_fsid(&self, path: &str, fsid: FsId) {
        let path = Self::normalize_path(path);
        if let Some(file) = self
            .files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&path)
        {
            file.fsid = fsid;
            return;
        }
        if let Some(id) = self
            .dirs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&path)
        {
            *id = fsid;
        }
    }

    /// Set a specific mtime without touching the content.
    pub fn set_mtime(&self, path: &str, mtime: u64) {
        let path = Self::normalize_path(path);
        if let Some(file) = self
            .files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&path)
        {
            file.mtime = mtime;
        }
    }

    /// Move a file or directory (with everything below it), keeping identities.
    pub fn rename(&self, from: &str, to: &str) {
        let from = Self::normalize_path(from);
        let to = Self::normalize_path(to);
        if let Some(parent) = Self::parent_path(&to) {
            self.mkdir(&parent);
        }
        let prefix = format!("{}/", from);
        let rebase = |path: &str| -> Option<String> {
            if path == from {
                Some(to.clone())
            } else {
                path.strip_prefix(&prefix)
                    .map(|rest| format!("{}/{}", to, rest))
            }
        };

        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        let moved: Vec<(String, String)> = files
            .keys()
            .filter_map(|p| rebase(p).map(|new| (p.clone(), new)))
            .collect();
        for (old, new) in moved {
            if let Some(file) = files.remove(&old) {
                files.insert(new, file);
            }
        }
        drop(files);

        let mut dirs = self.dirs.write().unwrap_or_else(|e| e.into_inner());
        let moved: Vec<(String, String)> = dirs
            .keys()
            .filter_map(|p| rebase(p).map(|new| (p.clone(), new)))
            .collect();
        for (old, new) in moved {
            if let Some(id) = dirs.remove(&old) {
                dirs.insert(new, id);
            }
        }
    }

    /// Delete a file or a directory with everything below it.
    pub fn delete(&self, path: &str) {
        let path = Self::normalize_path(path);
        let prefix = format!("{}/", path);
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|p, _| *p != path && !p.starts_with(&prefix));
        self.dirs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|p, _| *p != path && !p.starts_with(&prefix));
    }

    /// Make the next `times` opens of `path` fail transiently.
    pub fn fail_transiently(&self, path: &str, times: u32) {
        self.transient
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(Self::normalize_path(path), times);
    }

    /// Make enumeration of `path` fail.
    pub fn fail_listing(&self, path: &str) {
        self.unlistable
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(Self::normalize_path(path));
    }

    fn take_transient(&self, path: &str) -> bool {
        let mut transient = self.transient.write().unwrap_or_else(|e| e.into_inner());
        match transient.get_mut(path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle over a snapshot of an in-memory entry.
pub struct InMemoryHandle {
    info: FileInfo,
    content: Vec<u8>,
}

#[async_trait]
impl FileHandle for InMemoryHandle {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let start = (offset as usize).min(self.content.len());
        let end = start.saturating_add(len).min(self.content.len());
        Ok(self.content[start..end].to_vec())
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    type Handle = InMemoryHandle;

    fn alias_name(&self, local: &str) -> Option<String> {
        if self.case_fold_aliases {
            Some(local.to_lowercase())
        } else {
            None
        }
    }

    async fn open(&self, path: &str) -> Result<InMemoryHandle> {
        let path = Self::normalize_path(path);

        if self.take_transient(&path) {
            return Err(FsError::Transient(path));
        }

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = files.get(&path) {
            return Ok(InMemoryHandle {
                info: FileInfo {
                    kind: NodeKind::File,
                    size: file.content.len() as u64,
                    mtime_millis: file.mtime,
                    fsid: Some(file.fsid),
                },
                content: file.content.clone(),
            });
        }

        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = dirs.get(&path) {
            return Ok(InMemoryHandle {
                info: FileInfo {
                    kind: NodeKind::Folder,
                    size: 0,
                    mtime_millis: 0,
                    fsid: Some(*id),
                },
                content: Vec::new(),
            });
        }

        Err(FsError::NotFound(path))
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize_path(path);
        if self
            .unlistable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&path)
        {
            return Err(FsError::Io(format!("cannot enumerate {}", path)));
        }

        let dirs = self.dirs.read().unwrap_or_else(|e| e.into_inner());
        if !dirs.contains_key(&path) {
            return Err(FsError::NotDirectory(path));
        }

        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let direct_child = |p: &str| -> Option<String> {
            let rest = p.strip_prefix(&prefix)?;
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        };

        let mut entries = Vec::new();
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        for file_path in files.keys() {
            if let Some(name) = direct_child(file_path) {
                entries.push(FileEntry {
                    name,
                    is_dir: false,
                });
            }
        }
        for dir_path in dirs.keys() {
            if let Some(name) = direct_child(dir_path) {
                entries.push(FileEntry { name, is_dir: true });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(entries)
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This lets tests keep mutating a filesystem that a SyncContext owns
#[async_trait]
impl<T: FileSystem> FileSystem for std::sync::Arc<T> {
    type Handle = T::Handle;

    fn separator(&self) -> &str {
        (**self).separator()
    }

    fn local_to_name(&self, local: &str) -> String {
        (**self).local_to_name(local)
    }

    fn alias_name(&self, local: &str) -> Option<String> {
        (**self).alias_name(local)
    }

    async fn open(&self, path: &str) -> Result<Self::Handle> {
        (**self).open(path).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }
}
