//! Replication Receiver: reads Transfer Units from inbound sessions and
//! materializes them in the drop folder.

use crate::echo::EchoGuard;
use crate::status::NodeStats;
use dropsync_core::{
    recv_unit, sanitize_name, FileSystem, FsError, NameError, ReceiveError, Session, TransportError,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Rejected file name: {0}")]
    Name(#[from] NameError),

    #[error("Failed to write {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: FsError,
    },
}

pub struct Receiver<F: FileSystem> {
    fs: F,
    echo: Option<EchoGuard>,
    stats: Arc<NodeStats>,
}

impl<F: FileSystem> Receiver<F> {
    pub fn new(fs: F, stats: Arc<NodeStats>) -> Self {
        Self {
            fs,
            echo: None,
            stats,
        }
    }

    /// Record created names so the local watcher does not send them back.
    pub fn with_echo_guard(mut self, echo: EchoGuard) -> Self {
        self.echo = Some(echo);
        self
    }

    /// Read units until the session fails or breaks the protocol.
    ///
    /// File errors drop the unit and keep the session. Returns the error
    /// that ended the loop; the session is closed by then.
    pub async fn receive_loop(&self, session: &dyn Session) -> ReceiveError {
        let reason = loop {
            match recv_unit(session).await {
                Ok(unit) => match self.materialize(&unit.name, &unit.content).await {
                    Ok(name) => {
                        info!("Received {} ({} bytes) from {}", name, unit.content.len(), session.peer());
                    }
                    Err(e) => {
                        self.stats.record_failed();
                        warn!("Dropping file from {}: {}", session.peer(), e);
                    }
                },
                Err(e) => break e,
            }
        };

        match &reason {
            ReceiveError::Transport(TransportError::Closed) => {
                info!("Session from {} closed", session.peer());
            }
            ReceiveError::Transport(e) => {
                info!("Session from {} ended: {}", session.peer(), e);
            }
            ReceiveError::Protocol(e) => {
                warn!("Protocol violation from {}, closing session: {}", session.peer(), e);
            }
        }
        let _ = session.close().await;
        reason
    }

    /// Create or overwrite `name` in the drop folder. Returns the name written.
    pub async fn materialize(&self, name: &str, content: &[u8]) -> Result<String, MaterializeError> {
        let name = sanitize_name(name)?;

        let existed = match self.fs.exists(&name).await {
            Ok(existed) => existed,
            Err(e) => {
                debug!("Could not check {} before writing: {}", name, e);
                false
            }
        };

        // Recorded before the write so the watcher never sees the file unrecorded
        if !existed {
            if let Some(echo) = &self.echo {
                echo.record(&name);
            }
        }

        if let Err(source) = self.fs.write(&name, content).await {
            if !existed {
                if let Some(echo) = &self.echo {
                    echo.take(&name);
                }
            }
            return Err(MaterializeError::Write { name, source });
        }

        self.stats.record_received();
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropsync_core::{send_unit, InMemoryFs, MemorySession, ProtocolError};

    fn receiver(fs: Arc<InMemoryFs>) -> Receiver<Arc<InMemoryFs>> {
        Receiver::new(fs, Arc::new(NodeStats::new()))
    }

    #[tokio::test]
    async fn test_materialize_creates_file() {
        let fs = Arc::new(InMemoryFs::new());
        let receiver = receiver(Arc::clone(&fs));

        let name = receiver.materialize("report.bin", &[1, 2, 3]).await.unwrap();

        assert_eq!(name, "report.bin");
        assert_eq!(fs.read("report.bin").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(receiver.stats.files_received(), 1);
    }

    #[tokio::test]
    async fn test_materialize_is_idempotent_overwrite() {
        let fs = Arc::new(InMemoryFs::new());
        let receiver = receiver(Arc::clone(&fs));

        receiver.materialize("same.txt", b"v1").await.unwrap();
        receiver.materialize("same.txt", b"v2").await.unwrap();
        receiver.materialize("same.txt", b"v2").await.unwrap();

        assert_eq!(fs.snapshot().len(), 1);
        assert_eq!(fs.read("same.txt").await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_materialize_rejects_traversal() {
        let fs = Arc::new(InMemoryFs::new());
        let receiver = receiver(Arc::clone(&fs));

        for bad in ["../escape", "/etc/passwd", "", "..", "C:evil", "a\0b"] {
            let err = receiver.materialize(bad, b"x").await.unwrap_err();
            assert!(matches!(err, MaterializeError::Name(_)), "accepted {bad:?}");
        }
        assert!(fs.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_echo_recorded_only_for_new_files() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("old.txt", b"old").await.unwrap();
        let echo = EchoGuard::new();
        let receiver = receiver(Arc::clone(&fs)).with_echo_guard(echo.clone());

        receiver.materialize("new.txt", b"n").await.unwrap();
        receiver.materialize("old.txt", b"o").await.unwrap();

        assert!(echo.take("new.txt"));
        assert!(!echo.take("old.txt"));
    }

    #[tokio::test]
    async fn test_receive_loop_materializes_until_close() {
        let fs = Arc::new(InMemoryFs::new());
        let receiver = receiver(Arc::clone(&fs));
        let (remote, local) = MemorySession::pair("node-a", "node-b");

        send_unit(&remote, "a.txt", b"A").await.unwrap();
        send_unit(&remote, "b.txt", b"B").await.unwrap();
        remote.close().await.unwrap();

        let reason = receiver.receive_loop(&local).await;

        assert!(matches!(reason, ReceiveError::Transport(TransportError::Closed)));
        assert_eq!(fs.read("a.txt").await.unwrap(), b"A");
        assert_eq!(fs.read("b.txt").await.unwrap(), b"B");
    }

    #[tokio::test]
    async fn test_bad_name_keeps_session() {
        let fs = Arc::new(InMemoryFs::new());
        let receiver = receiver(Arc::clone(&fs));
        let (remote, local) = MemorySession::pair("node-a", "node-b");

        send_unit(&remote, "../x", b"bad").await.unwrap();
        send_unit(&remote, "ok.txt", b"good").await.unwrap();
        drop(remote);

        receiver.receive_loop(&local).await;

        assert_eq!(fs.snapshot().len(), 1);
        assert_eq!(fs.read("ok.txt").await.unwrap(), b"good");
        assert_eq!(receiver.stats.files_failed(), 1);
    }

    #[tokio::test]
    async fn test_protocol_violation_ends_session() {
        let fs = Arc::new(InMemoryFs::new());
        let receiver = receiver(Arc::clone(&fs));
        let (remote, local) = MemorySession::pair("node-a", "node-b");

        remote.send_binary(b"orphan").await.unwrap();
        remote.send_text("late.txt").await.unwrap();

        let reason = receiver.receive_loop(&local).await;

        assert!(matches!(
            reason,
            ReceiveError::Protocol(ProtocolError::ContentWithoutName(6))
        ));
        assert!(!remote.is_open());
        assert!(fs.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_sessions_last_write_wins() {
        let fs = Arc::new(InMemoryFs::new());
        let receiver = receiver(Arc::clone(&fs));
        let (remote_1, local_1) = MemorySession::pair("node-a", "node-b");
        let (remote_2, local_2) = MemorySession::pair("node-a", "node-b");

        send_unit(&remote_1, "shared.txt", b"from one").await.unwrap();
        send_unit(&remote_1, "one.txt", b"1").await.unwrap();
        send_unit(&remote_2, "shared.txt", b"from two").await.unwrap();
        send_unit(&remote_2, "two.txt", b"2").await.unwrap();
        remote_1.close().await.unwrap();
        remote_2.close().await.unwrap();

        let (first, second) = tokio::join!(
            receiver.receive_loop(&local_1),
            receiver.receive_loop(&local_2)
        );

        assert!(matches!(first, ReceiveError::Transport(TransportError::Closed)));
        assert!(matches!(second, ReceiveError::Transport(TransportError::Closed)));
        assert_eq!(fs.read("one.txt").await.unwrap(), b"1");
        assert_eq!(fs.read("two.txt").await.unwrap(), b"2");
        // Whole units only; whichever write landed last wins
        let shared = fs.read("shared.txt").await.unwrap();
        assert!(shared == b"from one" || shared == b"from two", "mixed content {shared:?}");
        assert_eq!(receiver.stats.files_received(), 4);
    }

    #[tokio::test]
    async fn test_materialize_longest_name_on_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let receiver = Receiver::new(
            crate::native_fs::NativeFs::new(dir.path().to_path_buf()),
            Arc::new(NodeStats::new()),
        );
        let name = "x".repeat(255);

        let written = receiver.materialize(&name, b"data").await.unwrap();

        assert_eq!(written, name);
        assert_eq!(std::fs::read(dir.path().join(&name)).unwrap(), b"data");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
