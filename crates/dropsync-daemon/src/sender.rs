//! Replication Sender: turns new entries in the watched folder into
//! Transfer Units on the outbound session.
//!
//! One Sender task consumes watcher events in order, so units reach the
//! peer in event order and never interleave on a session.

use crate::echo::EchoGuard;
use crate::manager::{ConnectError, ConnectionManager};
use crate::status::NodeStats;
use crate::watcher::{EntryKind, FileEvent};
use dropsync_core::{send_unit, FileSystem, FsError, SendStage, Session, UnitSendError};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Name writes that fail leave nothing on the peer, so the file is retried
/// on a fresh session up to this many times.
const MAX_NAME_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("{0} is a directory")]
    Directory(String),

    #[error("{path} is {size} bytes, over the {limit} byte limit")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("Failed to read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: FsError,
    },

    #[error(transparent)]
    Transport(#[from] UnitSendError),

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    SkippedEcho,
}

pub struct Sender<F: FileSystem> {
    fs: F,
    manager: Arc<ConnectionManager>,
    max_file_size: u64,
    echo: Option<EchoGuard>,
    stats: Arc<NodeStats>,
}

impl<F: FileSystem> Sender<F> {
    pub fn new(fs: F, manager: Arc<ConnectionManager>, max_file_size: u64, stats: Arc<NodeStats>) -> Self {
        Self {
            fs,
            manager,
            max_file_size,
            echo: None,
            stats,
        }
    }

    /// Skip watcher events for files the Receiver just wrote.
    pub fn with_echo_guard(mut self, echo: EchoGuard) -> Self {
        self.echo = Some(echo);
        self
    }

    /// Consume events until the watcher side closes the channel.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<FileEvent>) {
        // Connect up front; events raised meanwhile wait in the channel
        if let Err(e) = self.manager.outbound().await {
            error!("{}", e);
        }

        while let Some(event) = rx.recv().await {
            match self.on_file_created(&event).await {
                Ok(SendOutcome::Sent) => {}
                Ok(SendOutcome::SkippedEcho) => {
                    debug!("Skipping {} (received from peer)", event.path);
                }
                Err(SendError::Directory(path)) => {
                    warn!("Ignoring directory {}", path);
                }
                Err(e) => {
                    self.stats.record_failed();
                    error!("Failed to replicate {}: {}", event.path, e);
                }
            }
        }
        debug!("Sender stopped");
    }

    /// Replicate one newly created entry.
    pub async fn on_file_created(&self, event: &FileEvent) -> Result<SendOutcome, SendError> {
        if event.kind == EntryKind::Directory {
            return Err(SendError::Directory(event.path.clone()));
        }

        if let Some(echo) = &self.echo {
            if echo.take(&event.path) {
                return Ok(SendOutcome::SkippedEcho);
            }
        }

        let mut name_failures = 0;
        loop {
            let session = self.manager.outbound().await?;

            match self.send_file(&event.path, session.as_ref()).await {
                Ok(()) => {
                    self.stats.record_sent();
                    info!("Sent {} to {}", event.path, session.peer());
                    return Ok(SendOutcome::Sent);
                }
                Err(SendError::Transport(e)) => {
                    self.manager.invalidate(&session).await;

                    if e.stage == SendStage::Name && name_failures < MAX_NAME_RETRIES {
                        name_failures += 1;
                        warn!("{}; retrying on a new session", e);
                        continue;
                    }
                    return Err(SendError::Transport(e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send `path` as one unit on `session`.
    pub async fn send_file(&self, path: &str, session: &dyn Session) -> Result<(), SendError> {
        let stat = self.fs.stat(path).await.map_err(|source| SendError::File {
            path: path.to_string(),
            source,
        })?;

        if stat.is_dir {
            return Err(SendError::Directory(path.to_string()));
        }
        if stat.size > self.max_file_size {
            return Err(SendError::TooLarge {
                path: path.to_string(),
                size: stat.size,
                limit: self.max_file_size,
            });
        }

        let content = self.fs.read(path).await.map_err(|source| SendError::File {
            path: path.to_string(),
            source,
        })?;

        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path);

        send_unit(session, name, &content).await?;
        Ok(())
    }
}

/// Queue every file already in the folder, for `--send-existing`.
pub async fn queue_existing<F: FileSystem>(
    fs: &F,
    tx: &mpsc::UnboundedSender<FileEvent>,
) -> Result<usize, FsError> {
    let mut queued = 0;
    for entry in fs.list().await? {
        if entry.is_dir || entry.name.starts_with('.') {
            continue;
        }
        if tx
            .send(FileEvent {
                path: entry.name,
                kind: EntryKind::File,
            })
            .is_err()
        {
            break;
        }
        queued += 1;
    }
    Ok(queued)
}
