//! Shared helpers for unit tests.

use async_trait::async_trait;
use dropsync_core::transport::Result as TransportResult;
use dropsync_core::{Dialer, MemorySession, Session, TransportError};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A throwaway CA able to sign node certificates.
pub struct TestPki {
    pub ca_pem: Vec<u8>,
    ca_cert: rcgen::Certificate,
    ca_key: KeyPair,
}

pub struct NodeCert {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, "dropsync test ca");
        let ca_cert = params.self_signed(&ca_key).unwrap();

        Self {
            ca_pem: ca_cert.pem().into_bytes(),
            ca_cert,
            ca_key,
        }
    }

    /// Node certificate valid for localhost and 127.0.0.1.
    pub fn node(&self, name: &str) -> NodeCert {
        let key = KeyPair::generate().unwrap();
        let mut params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();

        NodeCert {
            cert_pem: cert.pem().into_bytes(),
            key_pem: key.serialize_pem().into_bytes(),
        }
    }
}

/// Dialer that fails a scripted number of times, then hands out
/// in-memory sessions. The peer end of every session is forwarded
/// on a channel so tests can play the remote node.
pub struct ScriptedDialer {
    failures: Mutex<VecDeque<TransportError>>,
    attempts: AtomicU32,
    peers: mpsc::UnboundedSender<MemorySession>,
}

impl ScriptedDialer {
    pub fn new(failures: Vec<TransportError>) -> (Self, mpsc::UnboundedReceiver<MemorySession>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        (
            Self {
                failures: Mutex::new(failures.into()),
                attempts: AtomicU32::new(0),
                peers,
            },
            peer_rx,
        )
    }

    pub fn unreachable(times: usize) -> (Self, mpsc::UnboundedReceiver<MemorySession>) {
        Self::new(
            (0..times)
                .map(|_| TransportError::ConnectionFailed("connection refused".into()))
                .collect(),
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    fn target(&self) -> &str {
        "memory-peer"
    }

    async fn dial(&self) -> TransportResult<Box<dyn Session>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let (ours, theirs) = MemorySession::pair("local", "memory-peer");
        self.peers
            .send(theirs)
            .map_err(|_| TransportError::ConnectionFailed("test peer gone".into()))?;
        Ok(Box::new(ours))
    }
}
