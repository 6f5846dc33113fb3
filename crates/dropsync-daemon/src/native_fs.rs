//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use dropsync_core::fs::{FileEntry, FileStat, FileSystem, FsError, Result};
use std::io;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Native filesystem rooted at one flat folder
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// Hidden sibling the content is staged in before the rename.
    /// Independent of the target name so it fits whenever the target does.
    fn staging_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.base_path.join(format!(".{}.part", id))
    }
}

fn map_io(path: &str, e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        _ => FsError::Io(format!("{}: {}", path, e)),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path).await.map_err(|e| map_io(path, e))?;
        if metadata.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        fs::read(&full_path).await.map_err(|e| map_io(path, e))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);
        if fs::metadata(&full_path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(FsError::IsDirectory(path.to_string()));
        }

        let staging = self.staging_path();
        if let Err(e) = fs::write(&staging, content).await {
            let _ = fs::remove_file(&staging).await;
            return Err(map_io(path, e));
        }

        if let Err(e) = fs::rename(&staging, &full_path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(map_io(path, e));
        }

        debug!("Wrote {} ({} bytes)", full_path.display(), content.len());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| map_io("", e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| map_io("", e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await.map_err(|e| map_io(&name, e))?;

            entries.push(FileEntry {
                name,
                is_dir: metadata.is_dir(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path);
        fs::try_exists(&full_path).await.map_err(|e| map_io(path, e))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path).await.map_err(|e| map_io(path, e))?;

        Ok(FileStat {
            size: metadata.len(),
            is_dir: metadata.is_dir(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        fs.write("report.bin", &[1, 2, 3]).await.unwrap();

        assert_eq!(fs.read("report.bin").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(fs.stat("report.bin").await.unwrap().size, 3);
        assert!(fs.exists("report.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_replaces_and_leaves_no_staging_files() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        fs.write("same.txt", b"first").await.unwrap();
        fs.write("same.txt", b"second").await.unwrap();

        assert_eq!(fs.read("same.txt").await.unwrap(), b"second");
        let names: Vec<_> = fs.list().await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["same.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_write_longest_valid_name() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());
        let name = "x".repeat(255);
        dropsync_core::sanitize_name(&name).unwrap();

        fs.write(&name, b"data").await.unwrap();

        assert_eq!(fs.read(&name).await.unwrap(), b"data");
        let names: Vec<_> = fs.list().await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![name]);
    }

    #[tokio::test]
    async fn test_missing_file_maps_to_not_found() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        assert!(matches!(fs.read("nope").await, Err(FsError::NotFound(_))));
        assert!(matches!(fs.stat("nope").await, Err(FsError::NotFound(_))));
        assert!(!fs.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_directory_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("inbox")).unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        assert!(fs.stat("inbox").await.unwrap().is_dir);
        assert!(matches!(fs.read("inbox").await, Err(FsError::IsDirectory(_))));
        assert!(matches!(fs.write("inbox", b"x").await, Err(FsError::IsDirectory(_))));
        assert_eq!(
            fs.list().await.unwrap(),
            vec![FileEntry { name: "inbox".into(), is_dir: true }]
        );
    }
}
