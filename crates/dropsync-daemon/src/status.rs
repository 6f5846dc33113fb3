//! Node counters and the HTTPS status page served next to `/ws`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Value of the Strict-Transport-Security header on every status response.
pub const HSTS_HEADER: &str = "max-age=31536000; includeSubDomains";

/// Counters shared by the Sender, the Receiver and the listener.
#[derive(Debug, Default)]
pub struct NodeStats {
    files_sent: AtomicU64,
    files_received: AtomicU64,
    files_failed: AtomicU64,
    inbound_sessions: AtomicU64,
}

impl NodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.files_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.files_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.inbound_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        // Saturating: never wrap below zero
        let _ = self
            .inbound_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn files_sent(&self) -> u64 {
        self.files_sent.load(Ordering::Relaxed)
    }

    pub fn files_received(&self) -> u64 {
        self.files_received.load(Ordering::Relaxed)
    }

    pub fn files_failed(&self) -> u64 {
        self.files_failed.load(Ordering::Relaxed)
    }

    pub fn inbound_sessions(&self) -> u64 {
        self.inbound_sessions.load(Ordering::Relaxed)
    }
}

/// JSON body of the status page.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub node: String,
    pub secure: bool,
    /// "connected" or "disconnected"
    pub outbound: &'static str,
    pub peer: String,
    pub inbound_sessions: u64,
    pub files_sent: u64,
    pub files_received: u64,
    pub files_failed: u64,
}

impl StatusReport {
    pub fn new(node: &str, peer: &str, outbound_connected: bool, stats: &NodeStats) -> Self {
        Self {
            node: node.to_string(),
            secure: true,
            outbound: if outbound_connected {
                "connected"
            } else {
                "disconnected"
            },
            peer: peer.to_string(),
            inbound_sessions: stats.inbound_sessions(),
            files_sent: stats.files_sent(),
            files_received: stats.files_received(),
            files_failed: stats.files_failed(),
        }
    }

    /// Full HTTP/1.1 response carrying this report.
    pub fn to_http_response(&self) -> Vec<u8> {
        let body = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/json\r\n\
             Strict-Transport-Security: {}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            HSTS_HEADER,
            body.len(),
            body
        )
        .into_bytes()
    }
}
