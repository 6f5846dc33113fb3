//! TLS listener for peer connections.
//!
//! Every accepted TCP connection gets its own task:
//! - TLS 1.3 handshake requiring a client certificate from the peer CA
//! - `GET /ws` is upgraded to a WebSocket and handed to the Receiver
//! - any other request gets the JSON status page
//!
//! Connections that fail the TLS handshake are dropped before any
//! application data is exchanged.

use crate::connection::{ws_config, WsSession, MAX_MESSAGE_SIZE};
use crate::manager::ConnectionManager;
use crate::receiver::Receiver;
use crate::status::{NodeStats, StatusReport};
use dropsync_core::{Direction, FileSystem};
use rustls::ServerConfig;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Path the replication WebSocket is served on.
pub const WS_PATH: &str = "/ws";

/// Routing gives up waiting for the end of the request line past this.
const MAX_REQUEST_LINE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Replication,
    Status,
}

/// Decide where a request goes from the first bytes of its request line.
fn route(request: &[u8]) -> Route {
    let line_end = request
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(request.len());
    let line = String::from_utf8_lossy(&request[..line_end]);

    let mut parts = line.split_whitespace();
    let target = match (parts.next(), parts.next()) {
        (Some(_method), Some(target)) => target,
        _ => return Route::Status,
    };

    let path = target.split('?').next().unwrap_or(target);
    if path == WS_PATH {
        Route::Replication
    } else {
        Route::Status
    }
}

/// Read until the request line is complete, the peer stops sending, or
/// `MAX_REQUEST_LINE` bytes have arrived. Returns everything read.
async fn read_request_line<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Vec<u8>> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while head.len() < MAX_REQUEST_LINE && !head.windows(2).any(|w| w == b"\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
    }
    Ok(head)
}

/// A stream whose already-consumed head is replayed before the rest.
struct Peeked<S> {
    head: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> Peeked<S> {
    fn new(head: Vec<u8>, inner: S) -> Self {
        Self { head, pos: 0, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Peeked<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.pos < this.head.len() {
            let n = (this.head.len() - this.pos).min(buf.remaining());
            buf.put_slice(&this.head[this.pos..this.pos + n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Peeked<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// What the status page reports besides the counters.
#[derive(Clone)]
pub struct StatusSource {
    pub node: String,
    pub manager: Arc<ConnectionManager>,
    pub stats: Arc<NodeStats>,
}

impl StatusSource {
    async fn report(&self) -> StatusReport {
        StatusReport::new(
            &self.node,
            self.manager.target(),
            self.manager.is_connected().await,
            &self.stats,
        )
    }
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Bound on the TLS handshake and on the WebSocket upgrade, each
    pub handshake_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

struct Shared<F: FileSystem> {
    acceptor: TlsAcceptor,
    receiver: Receiver<F>,
    status: StatusSource,
    options: ServerOptions,
}

/// Accepts inbound sessions from the peer.
pub struct InboundServer<F: FileSystem> {
    listener: TcpListener,
    shared: Arc<Shared<F>>,
}

impl<F: FileSystem + 'static> InboundServer<F> {
    /// Bind the listening socket.
    pub async fn bind(
        listen_addr: &str,
        tls: Arc<ServerConfig>,
        receiver: Receiver<F>,
        status: StatusSource,
        options: ServerOptions,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                acceptor: TlsAcceptor::from(tls),
                receiver,
                status,
                options,
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves, then abort every
    /// connection task.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("Listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let shared = Arc::clone(&self.shared);
                        tasks.spawn(async move { shared.handle(stream, addr).await });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        tasks.shutdown().await;
    }
}

impl<F: FileSystem> Shared<F> {
    async fn handle(&self, tcp: TcpStream, addr: SocketAddr) {
        let _ = tcp.set_nodelay(true);
        let handshake_timeout = self.options.handshake_timeout;

        let mut tls = match timeout(handshake_timeout, self.acceptor.accept(tcp)).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => {
                warn!("Rejected connection from {}: {}", addr, e);
                return;
            }
            Err(_) => {
                warn!("Rejected connection from {}: TLS handshake timed out", addr);
                return;
            }
        };

        let head = match timeout(handshake_timeout, read_request_line(&mut tls)).await {
            Ok(Ok(head)) if head.is_empty() => {
                debug!("Connection from {} closed before sending a request", addr);
                return;
            }
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                debug!("Failed to read request from {}: {}", addr, e);
                return;
            }
            Err(_) => {
                debug!("Connection from {} sent no request", addr);
                return;
            }
        };

        match route(&head) {
            Route::Replication => self.replicate(Peeked::new(head, tls), addr).await,
            Route::Status => self.serve_status(tls, addr).await,
        }
    }

    async fn replicate<S>(&self, stream: S, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let config = ws_config(self.options.max_message_size);
        let upgrade = tokio_tungstenite::accept_async_with_config(stream, Some(config));

        let ws_stream = match timeout(self.options.handshake_timeout, upgrade).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                warn!("WebSocket upgrade failed for {}: {}", addr, e);
                return;
            }
            Err(_) => {
                warn!("WebSocket upgrade from {} timed out", addr);
                return;
            }
        };

        info!("Inbound session from {}", addr);
        let session = WsSession::new(addr.to_string(), Direction::Inbound, ws_stream);

        let stats = &self.status.stats;
        stats.session_opened();
        self.receiver.receive_loop(&session).await;
        stats.session_closed();
    }

    async fn serve_status<S>(&self, mut stream: S, addr: SocketAddr)
    where
        S: AsyncWrite + Unpin,
    {
        let response = self.status.report().await.to_http_response();
        if let Err(e) = stream.write_all(&response).await {
            debug!("Failed to write status to {}: {}", addr, e);
            return;
        }
        let _ = stream.flush().await;
        let _ = stream.shutdown().await;
        debug!("Served status to {}", addr);
    }
}
