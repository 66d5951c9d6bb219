//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use localsync_core::fs::{FileEntry, FileHandle, FileInfo, FileSystem, FsError, FsId, Result};
use localsync_core::node::NodeKind;
use std::io::{ErrorKind, SeekFrom};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Native filesystem gateway for the daemon.
///
/// Paths are absolute. Identities are inode numbers on unix; other platforms
/// report none, which disables move detection.
#[derive(Debug, Default, Clone)]
pub struct NativeFs {
    case_fold_aliases: bool,
}

impl NativeFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index lowercase names as aliases, for case-insensitive volumes.
    pub fn with_case_fold_aliases(mut self, enabled: bool) -> Self {
        self.case_fold_aliases = enabled;
        self
    }
}

/// Classify an IO error. Locked, busy or interrupted entries are transient.
fn map_io_error(path: &str, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        ErrorKind::NotADirectory => FsError::NotDirectory(path.to_string()),
        ErrorKind::WouldBlock
        | ErrorKind::Interrupted
        | ErrorKind::TimedOut
        | ErrorKind::ResourceBusy
        | ErrorKind::ExecutableFileBusy => FsError::Transient(format!("{}: {}", path, e)),
        _ => FsError::Io(format!("{}: {}", path, e)),
    }
}

fn mtime_millis(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .map(|t| {
            t.duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        })
        .unwrap_or(0)
}

#[cfg(unix)]
fn fsid_of(metadata: &std::fs::Metadata) -> Option<FsId> {
    use std::os::unix::fs::MetadataExt;
    Some(FsId(metadata.ino()))
}

#[cfg(not(unix))]
fn fsid_of(_metadata: &std::fs::Metadata) -> Option<FsId> {
    None
}

/// An open file, or a stat'ed folder.
pub struct NativeHandle {
    path: String,
    info: FileInfo,
    file: Option<File>,
}

#[async_trait]
impl FileHandle for NativeHandle {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let Some(file) = self.file.as_mut() else {
            return Err(FsError::Io(format!("{}: not a file", self.path)));
        };
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| map_io_error(&self.path, e))?;
        let mut buf = Vec::with_capacity(len);
        (&mut *file)
            .take(len as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| map_io_error(&self.path, e))?;
        Ok(buf)
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    type Handle = NativeHandle;

    fn separator(&self) -> &str {
        std::path::MAIN_SEPARATOR_STR
    }

    fn alias_name(&self, local: &str) -> Option<String> {
        self.case_fold_aliases.then(|| local.to_lowercase())
    }

    async fn open(&self, path: &str) -> Result<NativeHandle> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| map_io_error(path, e))?;

        let (kind, file, metadata) = if metadata.is_dir() {
            (NodeKind::Folder, None, metadata)
        } else {
            let file = File::open(path).await.map_err(|e| map_io_error(path, e))?;
            // Stat the open file so size and identity match what gets read
            let metadata = file
                .metadata()
                .await
                .map_err(|e| map_io_error(path, e))?;
            (NodeKind::File, Some(file), metadata)
        };

        Ok(NativeHandle {
            path: path.to_string(),
            info: FileInfo {
                kind,
                size: if kind == NodeKind::File { metadata.len() } else { 0 },
                mtime_millis: mtime_millis(&metadata),
                fsid: fsid_of(&metadata),
            },
            file,
        })
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(path)
            .await
            .map_err(|e| map_io_error(path, e))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| map_io_error(path, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .map_err(|e| map_io_error(path, e))?;

            entries.push(FileEntry { name, is_dir });
        }

        Ok(entries)
    }
}
