//! File-system capability used by the file handler.
//!
//! Handlers only ever `stat` and `open`; tests and embedders can plug an
//! in-memory implementation.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncRead;

pub type FileReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub len: u64,
    pub modified: SystemTime,
    pub is_dir: bool,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// `Ok(None)` when nothing exists at `path`.
    async fn stat(&self, path: &Path) -> io::Result<Option<FileMeta>>;

    async fn open(&self, path: &Path) -> io::Result<FileReader>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, path: &Path) -> io::Result<Option<FileMeta>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(FileMeta {
                len: meta.len(),
                modified: meta.modified().unwrap_or(UNIX_EPOCH),
                is_dir: meta.is_dir(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            // ENOTDIR: a path component is a regular file
            Err(e) if e.raw_os_error() == Some(20) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open(&self, path: &Path) -> io::Result<FileReader> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}
