//! Outgoing peer connections.
//!
//! `WssDialer` makes one connection attempt per `dial()`:
//! - TCP connect (bounded by the connect timeout)
//! - TLS 1.3 client handshake presenting the node certificate
//! - WebSocket upgrade on `/ws`
//!
//! Retrying is the Connection Manager's job.

use crate::connection::{ws_config, WsSession, MAX_MESSAGE_SIZE};
use async_trait::async_trait;
use dropsync_core::transport::Result;
use dropsync_core::{Dialer, Direction, Session, TransportError};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::debug;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DialerError {
    #[error("Invalid peer address '{0}': expected host:port")]
    InvalidAddress(String),
}

/// Dials the configured peer over WebSocket + mutual TLS.
pub struct WssDialer {
    /// host:port as configured
    address: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    max_message_size: usize,
}

impl WssDialer {
    pub fn new(address: &str, client_config: Arc<ClientConfig>) -> std::result::Result<Self, DialerError> {
        let server_name = server_name_for(address)?;
        Ok(Self {
            address: address.to_string(),
            server_name,
            connector: TlsConnector::from(client_config),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
        })
    }

    pub fn with_timeouts(mut self, connect: Duration, handshake: Duration) -> Self {
        self.connect_timeout = connect;
        self.handshake_timeout = handshake;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    async fn handshake(&self, tcp: TcpStream) -> Result<Box<dyn Session>> {
        let tls = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| classify_io(&self.address, e))?;

        debug!("TLS established with {}", self.address);

        let url = format!("wss://{}/ws", self.address);
        let (ws_stream, _response) =
            tokio_tungstenite::client_async_with_config(url, tls, Some(ws_config(self.max_message_size)))
                .await
                .map_err(|e| classify_ws(&self.address, e))?;

        Ok(Box::new(WsSession::new(
            self.address.clone(),
            Direction::Outbound,
            ws_stream,
        )))
    }
}

#[async_trait]
impl Dialer for WssDialer {
    fn target(&self) -> &str {
        &self.address
    }

    async fn dial(&self) -> Result<Box<dyn Session>> {
        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                TransportError::Timeout(format!(
                    "connect to {} after {:?}",
                    self.address, self.connect_timeout
                ))
            })?
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.address, e)))?;
        let _ = tcp.set_nodelay(true);

        tokio::time::timeout(self.handshake_timeout, self.handshake(tcp))
            .await
            .map_err(|_| {
                TransportError::Timeout(format!(
                    "handshake with {} after {:?}",
                    self.address, self.handshake_timeout
                ))
            })?
    }
}

/// TLS name to verify: the host part of `host:port`.
fn server_name_for(address: &str) -> std::result::Result<ServerName<'static>, DialerError> {
    let invalid = || DialerError::InvalidAddress(address.to_string());

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    ServerName::try_from(host.to_string()).map_err(|_| invalid())
}

/// A rustls error inside an I/O error means the peers refused each other.
fn classify_io(address: &str, e: io::Error) -> TransportError {
    let is_tls = e
        .get_ref()
        .map(|inner| inner.downcast_ref::<rustls::Error>().is_some())
        .unwrap_or(false);

    if is_tls {
        TransportError::HandshakeRejected(format!("{}: {}", address, e))
    } else {
        TransportError::ConnectionFailed(format!("{}: {}", address, e))
    }
}

fn classify_ws(address: &str, e: WsError) -> TransportError {
    match e {
        // Under TLS 1.3 the server's verdict on our certificate arrives here
        WsError::Io(io_err) => classify_io(address, io_err),
        WsError::Tls(tls_err) => TransportError::HandshakeRejected(format!("{}: {}", address, tls_err)),
        other => TransportError::ConnectionFailed(format!("{}: upgrade failed: {}", address, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_parsing() {
        assert!(matches!(
            server_name_for("peer.example.com:8443").unwrap(),
            ServerName::DnsName(_)
        ));
        assert!(matches!(
            server_name_for("127.0.0.1:8443").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(server_name_for("[::1]:8443").unwrap(), ServerName::IpAddress(_)));
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        assert!(server_name_for("no-port").is_err());
        assert!(server_name_for("host:notaport").is_err());
        assert!(server_name_for(":8443").is_err());
    }

    #[test]
    fn test_tls_errors_classified_as_rejection() {
        let wrapped = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        assert!(classify_io("peer:1", wrapped).is_auth_failure());

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(!classify_io("peer:1", refused).is_auth_failure());
    }

    #[tokio::test]
    async fn test_dial_unreachable_peer_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pki = crate::testing::TestPki::generate();
        let node = pki.node("node-a");
        let identity = crate::Identity::from_pem(&node.cert_pem, &node.key_pem, &pki.ca_pem).unwrap();
        let dialer = WssDialer::new(
            &addr.to_string(),
            identity.client_config(crate::ServerVerification::Verified).unwrap(),
        )
        .unwrap()
        .with_timeouts(Duration::from_secs(2), Duration::from_secs(2));

        let err = dialer.dial().await.err().unwrap();
        assert!(matches!(
            err,
            TransportError::ConnectionFailed(_) | TransportError::Timeout(_)
        ));
    }
}
