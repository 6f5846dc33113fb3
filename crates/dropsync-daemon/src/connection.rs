//! WebSocket implementation of the replication `Session`.
//!
//! Each session wraps a WebSocket stream over TLS, split into read and
//! write halves so a liveness reader and a writer can run concurrently.

use async_trait::async_trait;
use dropsync_core::transport::Result;
use dropsync_core::{Direction, Message, Session, TransportError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};
use tracing::{debug, error};

/// Default upper bound for one message (and therefore one file), 64 MiB.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// WebSocket settings shared by both sides of the link.
pub fn ws_config(max_message_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);
    config
}

/// A single WebSocket session to the peer node.
pub struct WsSession<S> {
    peer: String,
    direction: Direction,
    /// Write half of the WebSocket
    write: Mutex<SplitSink<WebSocketStream<S>, WsMessage>>,
    /// Read half of the WebSocket
    read: Mutex<SplitStream<WebSocketStream<S>>>,
    open: AtomicBool,
}

impl<S> WsSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an upgraded WebSocket stream.
    pub fn new(peer: String, direction: Direction, ws_stream: WebSocketStream<S>) -> Self {
        let (write, read) = ws_stream.split();
        Self {
            peer,
            direction,
            write: Mutex::new(write),
            read: Mutex::new(read),
            open: AtomicBool::new(true),
        }
    }

    async fn send_message(&self, msg: WsMessage) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let mut write = self.write.lock().await;
        write.send(msg).await.map_err(|e| {
            self.open.store(false, Ordering::SeqCst);
            match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
                other => TransportError::SendFailed(other.to_string()),
            }
        })
    }
}

#[async_trait]
impl<S> Session for WsSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
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
        self.send_message(WsMessage::Text(text.into())).await
    }

    async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send_message(WsMessage::Binary(data.to_vec().into())).await
    }

    async fn receive(&self) -> Result<Message> {
        let mut read = self.read.lock().await;
        let result = loop {
            match read.next().await {
                Some(Ok(msg)) => match msg {
                    WsMessage::Text(text) => return Ok(Message::Text(text.to_string())),
                    WsMessage::Binary(data) => return Ok(Message::Binary(data.to_vec())),
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
                    WsMessage::Close(_) => {
                        debug!("Received close frame from {}", self.peer);
                        break Err(TransportError::Closed);
                    }
                },
                Some(Err(e)) => {
                    break match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", self.peer);
                            Err(TransportError::Closed)
                        }
                        other => {
                            error!("WebSocket error on {}: {}", self.peer, other);
                            Err(TransportError::ReceiveFailed(other.to_string()))
                        }
                    };
                }
                None => {
                    debug!("Connection {} stream ended", self.peer);
                    break Err(TransportError::Closed);
                }
            }
        };

        self.open.store(false, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);

        // A writer stuck on a dead socket holds the lock; dropping the session unblocks it
        if let Ok(mut write) = self.write.try_lock() {
            let _ = write.send(WsMessage::Close(None)).await;
            let _ = write.close().await;
        }
        Ok(())
    }
}
