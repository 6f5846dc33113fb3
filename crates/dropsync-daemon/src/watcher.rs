//! File watcher with debouncing for the drop folder.
//!
//! Uses notify-debouncer-mini for change detection. Only entries that
//! newly appear directly under the folder are reported.

use anyhow::{Context, Result};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// A new entry in the watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Entry name relative to the folder root
    pub path: String,
    /// What kind of entry appeared
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Names currently present, so rewrites of an existing file are not
/// reported as new entries.
type SeenCache = Arc<Mutex<HashSet<String>>>;

/// File watcher that monitors the drop folder.
pub struct FileWatcher {
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

impl FileWatcher {
    /// Start watching `dir`, pushing new entries into `event_tx`.
    pub fn start(
        dir: PathBuf,
        debounce: Duration,
        event_tx: mpsc::UnboundedSender<FileEvent>,
    ) -> Result<Self> {
        // FSEvents on macOS reports canonical paths
        let dir = dir.canonicalize().unwrap_or(dir);

        let seen: SeenCache = Arc::new(Mutex::new(existing_entries(&dir)?));
        let seen_clone = Arc::clone(&seen);
        let dir_clone = dir.clone();

        let mut debouncer = new_debouncer(
            debounce,
            move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = Self::process_event(&event, &dir_clone, &seen_clone) {
                            if event_tx.send(file_event).is_err() {
                                // Receiver dropped
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )
        .context("Failed to create file watcher")?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;

        debug!("Watching {}", dir.display());

        Ok(Self {
            _debouncer: debouncer,
        })
    }

    /// Process a single debounced event, returning a FileEvent if an entry appeared.
    fn process_event(event: &DebouncedEvent, dir: &Path, seen: &SeenCache) -> Option<FileEvent> {
        let path = &event.path;

        // Direct children only
        if path.parent() != Some(dir) {
            return None;
        }
        let name = path.file_name()?.to_str()?.to_string();

        // Skip hidden entries, including our own staging files
        if name.starts_with('.') {
            return None;
        }

        let mut seen = match seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => {
                seen.remove(&name);
                return None;
            }
        };

        if !seen.insert(name.clone()) {
            return None;
        }

        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        debug!("New entry: {:?} - {}", kind, name);

        Some(FileEvent { path: name, kind })
    }
}

fn existing_entries(dir: &Path) -> Result<HashSet<String>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    Ok(entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_debouncer_mini::DebouncedEventKind;
    use tempfile::TempDir;

    fn event(path: PathBuf) -> DebouncedEvent {
        DebouncedEvent {
            path,
            kind: DebouncedEventKind::Any,
        }
    }

    fn setup() -> (TempDir, PathBuf, SeenCache) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().canonicalize().unwrap();
        let seen = Arc::new(Mutex::new(HashSet::new()));
        (tmp, dir, seen)
    }

    #[test]
    fn test_new_file_reported_once() {
        let (_tmp, dir, seen) = setup();
        let path = dir.join("report.bin");
        std::fs::write(&path, [1, 2, 3]).unwrap();

        let first = FileWatcher::process_event(&event(path.clone()), &dir, &seen);
        let second = FileWatcher::process_event(&event(path), &dir, &seen);

        assert_eq!(
            first,
            Some(FileEvent {
                path: "report.bin".into(),
                kind: EntryKind::File
            })
        );
        assert_eq!(second, None);
    }

    #[test]
    fn test_recreated_file_reported_again() {
        let (_tmp, dir, seen) = setup();
        let path = dir.join("a.txt");

        std::fs::write(&path, b"one").unwrap();
        assert!(FileWatcher::process_event(&event(path.clone()), &dir, &seen).is_some());

        std::fs::remove_file(&path).unwrap();
        assert!(FileWatcher::process_event(&event(path.clone()), &dir, &seen).is_none());

        std::fs::write(&path, b"two").unwrap();
        assert!(FileWatcher::process_event(&event(path), &dir, &seen).is_some());
    }

    #[test]
    fn test_hidden_and_nested_entries_ignored() {
        let (_tmp, dir, seen) = setup();
        std::fs::write(dir.join(".3f2a9c01b7d84e6f.part"), b"x").unwrap();
        std::fs::create_dir(dir.join("sub")).unwrap();
        std::fs::write(dir.join("sub").join("inner.txt"), b"x").unwrap();

        assert!(FileWatcher::process_event(&event(dir.join(".3f2a9c01b7d84e6f.part")), &dir, &seen).is_none());
        assert!(
            FileWatcher::process_event(&event(dir.join("sub").join("inner.txt")), &dir, &seen).is_none()
        );
    }

    #[test]
    fn test_directory_reported_as_directory() {
        let (_tmp, dir, seen) = setup();
        std::fs::create_dir(dir.join("inbox")).unwrap();

        let reported = FileWatcher::process_event(&event(dir.join("inbox")), &dir, &seen).unwrap();
        assert_eq!(reported.kind, EntryKind::Directory);
    }

    #[tokio::test]
    async fn test_watcher_reports_created_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("old.txt"), b"old").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _watcher =
            FileWatcher::start(tmp.path().to_path_buf(), Duration::from_millis(50), tx).unwrap();
        std::fs::write(tmp.path().join("new.txt"), b"new").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.path, "new.txt");
        assert_eq!(event.kind, EntryKind::File);
    }
}
