//! FileSystem trait abstraction over a single flat drop folder.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in dropsync-daemon) - Uses tokio::fs rooted at a directory
//!
//! Paths are entry names relative to the folder root.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// File metadata
#[derive(Debug, Clone)]
pub struct FileStat {
    /// File size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Entry name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Filesystem operations the Sender and Receiver need.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Create or replace a file. Readers see either the old or the new content.
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// List the entries of the folder root
    async fn list(&self) -> Result<Vec<FileEntry>>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
    dirs: RwLock<HashSet<String>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(HashSet::new()),
        }
    }

    /// Create an empty subdirectory entry.
    pub fn mkdir(&self, path: &str) {
        self.dirs
            .write()
            .expect("in-memory fs lock poisoned")
            .insert(path.to_string());
    }

    /// Remove a file, simulating a deletion racing with the Sender.
    pub fn remove(&self, path: &str) -> bool {
        self.files
            .write()
            .expect("in-memory fs lock poisoned")
            .remove(path)
            .is_some()
    }

    /// Snapshot of all files, for assertions.
    pub fn snapshot(&self) -> HashMap<String, Vec<u8>> {
        self.files.read().expect("in-memory fs lock poisoned").clone()
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        if self.dirs.read().expect("in-memory fs lock poisoned").contains(path) {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        let files = self.files.read().expect("in-memory fs lock poisoned");
        files
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if self.dirs.read().expect("in-memory fs lock poisoned").contains(path) {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        let mut files = self.files.write().expect("in-memory fs lock poisoned");
        files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FileEntry>> {
        let files = self.files.read().expect("in-memory fs lock poisoned");
        let dirs = self.dirs.read().expect("in-memory fs lock poisoned");

        let mut entries: Vec<FileEntry> = files
            .keys()
            .map(|name| FileEntry {
                name: name.clone(),
                is_dir: false,
            })
            .chain(dirs.iter().map(|name| FileEntry {
                name: name.clone(),
                is_dir: true,
            }))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let files = self.files.read().expect("in-memory fs lock poisoned");
        let dirs = self.dirs.read().expect("in-memory fs lock poisoned");
        Ok(files.contains_key(path) || dirs.contains(path))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        if let Some(content) = self.files.read().expect("in-memory fs lock poisoned").get(path) {
            return Ok(FileStat {
                size: content.len() as u64,
                is_dir: false,
            });
        }
        if self.dirs.read().expect("in-memory fs lock poisoned").contains(path) {
            return Ok(FileStat {
                size: 0,
                is_dir: true,
            });
        }
        Err(FsError::NotFound(path.to_string()))
    }
}

// Lets the Sender and Receiver share one filesystem when both folders are the same
#[async_trait]
impl<T: FileSystem> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn list(&self) -> Result<Vec<FileEntry>> {
        (**self).list().await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        fs.write("test.txt", b"hello world").await.unwrap();

        let content = fs.read("test.txt").await.unwrap();
        assert_eq!(content, b"hello world");

        assert!(fs.exists("test.txt").await.unwrap());
        assert!(!fs.exists("nonexistent.txt").await.unwrap());
        assert_eq!(fs.stat("test.txt").await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_inmemory_fs_overwrite_keeps_latest() {
        let fs = InMemoryFs::new();

        fs.write("same.txt", b"first").await.unwrap();
        fs.write("same.txt", b"second").await.unwrap();

        assert_eq!(fs.read("same.txt").await.unwrap(), b"second");
        assert_eq!(fs.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inmemory_fs_directories() {
        let fs = InMemoryFs::new();
        fs.mkdir("inbox");
        fs.write("a.txt", b"a").await.unwrap();

        assert!(fs.stat("inbox").await.unwrap().is_dir);
        assert!(matches!(fs.read("inbox").await, Err(FsError::IsDirectory(_))));
        assert!(matches!(
            fs.write("inbox", b"x").await,
            Err(FsError::IsDirectory(_))
        ));

        let entries = fs.list().await.unwrap();
        assert_eq!(
            entries,
            vec![
                FileEntry { name: "a.txt".into(), is_dir: false },
                FileEntry { name: "inbox".into(), is_dir: true },
            ]
        );
    }

    #[tokio::test]
    async fn test_inmemory_fs_missing_file() {
        let fs = InMemoryFs::new();
        fs.write("gone.txt", b"x").await.unwrap();
        assert!(fs.remove("gone.txt"));

        assert!(matches!(fs.read("gone.txt").await, Err(FsError::NotFound(_))));
        assert!(matches!(fs.stat("gone.txt").await, Err(FsError::NotFound(_))));
    }
}
