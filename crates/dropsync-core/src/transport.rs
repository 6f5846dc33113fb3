//! Session and Dialer traits for the replication link.
//!
//! Implementations:
//! - `WsSession` (in dropsync-daemon): WebSocket over mutually-authenticated TLS
//! - `MemorySession`: an in-process connected pair, for tests

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::lock::Mutex;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Session closed")]
    Closed,
}

impl TransportError {
    /// True when the peer was reachable but refused our identity (or we refused theirs).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, TransportError::HandshakeRejected(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Which side initiated the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// This node dialed the peer
    Outbound,
    /// The peer dialed this node
    Inbound,
}

/// Kind of an application message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// A whole application message. Partial messages never reach callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Text(_) => MessageKind::Text,
            Message::Binary(_) => MessageKind::Binary,
        }
    }
}

/// An authenticated, ordered, message-framed duplex link to the peer node.
///
/// Any error returned from a send or receive means the session is dead.
#[async_trait]
pub trait Session: Send + Sync {
    /// Label for the remote end (address or certificate subject), for logging.
    fn peer(&self) -> &str;

    fn direction(&self) -> Direction;

    /// False once a close was requested or an I/O failure was observed.
    fn is_open(&self) -> bool;

    /// Send one text message.
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Send one binary message.
    async fn send_binary(&self, data: &[u8]) -> Result<()>;

    /// Receive the next whole message (blocks until one arrives or the link closes).
    async fn receive(&self) -> Result<Message>;

    /// Close the session. Pending and later I/O fails with `Closed`.
    async fn close(&self) -> Result<()>;
}

/// Produces outbound sessions toward one configured peer.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Where this dialer connects to, for logging.
    fn target(&self) -> &str;

    /// Make a single connection attempt, including all handshakes.
    async fn dial(&self) -> Result<Box<dyn Session>>;
}

// Lets tests keep a handle on a dialer after moving it into a manager
#[async_trait]
impl<T: Dialer> Dialer for Arc<T> {
    fn target(&self) -> &str {
        (**self).target()
    }

    async fn dial(&self) -> Result<Box<dyn Session>> {
        (**self).dial().await
    }
}

/// One end of an in-memory session pair.
pub struct MemorySession {
    peer: String,
    direction: Direction,
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    /// Shared by both ends: closing either side kills the link
    open: Arc<AtomicBool>,
}

impl MemorySession {
    /// Create a connected pair. The first end is the dialer (outbound) side.
    pub fn pair(dialer: &str, listener: &str) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded();
        let (b_tx, a_rx) = mpsc::unbounded();
        let open = Arc::new(AtomicBool::new(true));

        let outbound = Self {
            peer: listener.to_string(),
            direction: Direction::Outbound,
            tx: a_tx,
            rx: Mutex::new(a_rx),
            open: Arc::clone(&open),
        };
        let inbound = Self {
            peer: dialer.to_string(),
            direction: Direction::Inbound,
            tx: b_tx,
            rx: Mutex::new(b_rx),
            open,
        };
        (outbound, inbound)
    }

    fn push(&self, msg: Message) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.tx.unbounded_send(msg).map_err(|e| {
            self.open.store(false, Ordering::SeqCst);
            TransportError::SendFailed(e.to_string())
        })
    }
}

#[async_trait]
impl Session for MemorySession {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.push(Message::Text(text.to_string()))
    }

    async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.push(Message::Binary(data.to_vec()))
    }

    async fn receive(&self) -> Result<Message> {
        let mut rx = self.rx.lock().await;
        match rx.next().await {
            Some(msg) => Ok(msg),
            None => {
                self.open.store(false, Ordering::SeqCst);
                Err(TransportError::Closed)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.tx.close_channel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_delivers_in_order() {
        let (a, b) = MemorySession::pair("node-a", "node-b");

        a.send_text("one").await.unwrap();
        a.send_binary(&[1, 2, 3]).await.unwrap();

        assert_eq!(b.receive().await.unwrap(), Message::Text("one".into()));
        assert_eq!(b.receive().await.unwrap(), Message::Binary(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_memory_pair_labels() {
        let (a, b) = MemorySession::pair("node-a", "node-b");

        assert_eq!(a.peer(), "node-b");
        assert_eq!(a.direction(), Direction::Outbound);
        assert_eq!(b.peer(), "node-a");
        assert_eq!(b.direction(), Direction::Inbound);
    }

    #[tokio::test]
    async fn test_close_fails_both_ends() {
        let (a, b) = MemorySession::pair("node-a", "node-b");

        b.close().await.unwrap();

        assert!(!a.is_open());
        assert!(matches!(a.send_text("late").await, Err(TransportError::Closed)));
        assert!(matches!(a.receive().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_dropped_peer_ends_receive() {
        let (a, b) = MemorySession::pair("node-a", "node-b");
        drop(a);

        assert!(matches!(b.receive().await, Err(TransportError::Closed)));
        assert!(!b.is_open());
    }

    #[test]
    fn test_message_kind() {
        let text = Message::Text("report.bin".into());
        let data = Message::Binary(vec![]);

        assert_eq!(text.kind(), MessageKind::Text);
        assert_eq!(data.kind(), MessageKind::Binary);
    }

    #[test]
    fn test_auth_failure_classification() {
        assert!(TransportError::HandshakeRejected("unknown ca".into()).is_auth_failure());
        assert!(!TransportError::ConnectionFailed("refused".into()).is_auth_failure());
    }
}
