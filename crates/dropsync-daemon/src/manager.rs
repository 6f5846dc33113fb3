//! Connection manager for the outbound side of the link.
//!
//! Owns the single outbound session:
//! - Dial with retry until a session exists (or the policy gives up)
//! - Hand out the current live session to the Sender
//! - Invalidate a session after a failed write so the next call reconnects
//!
//! A monitor task reads from each outbound session. The peer never sends
//! on it, so any read result means the link is gone.

use dropsync_core::{Dialer, RetryPolicy, Session, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Gave up connecting to {target} after {attempts} attempts: {last}")]
    RetriesExhausted {
        target: String,
        attempts: u32,
        #[source]
        last: TransportError,
    },
}

struct Current {
    session: Arc<dyn Session>,
    monitor: JoinHandle<()>,
}

/// Owns the outbound session and its retry policy.
pub struct ConnectionManager {
    dialer: Box<dyn Dialer>,
    policy: RetryPolicy,
    current: Mutex<Option<Current>>,
}

impl ConnectionManager {
    pub fn new(dialer: Box<dyn Dialer>, policy: RetryPolicy) -> Self {
        Self {
            dialer,
            policy,
            current: Mutex::new(None),
        }
    }

    /// Address of the peer this manager dials.
    pub fn target(&self) -> &str {
        self.dialer.target()
    }

    /// Dial until a session is established, then install it as current.
    pub async fn establish_outbound(&self) -> Result<Arc<dyn Session>, ConnectError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.dialer.dial().await {
                Ok(session) => {
                    let session: Arc<dyn Session> = Arc::from(session);
                    info!(
                        "Connected to {} (attempt {})",
                        self.dialer.target(),
                        attempts
                    );
                    self.replace(Arc::clone(&session)).await;
                    return Ok(session);
                }
                Err(e) => {
                    if e.is_auth_failure() {
                        error!(
                            "Peer {} rejected the handshake (attempt {}): {}",
                            self.dialer.target(),
                            attempts,
                            e
                        );
                    } else {
                        warn!(
                            "Failed to connect to {} (attempt {}): {}",
                            self.dialer.target(),
                            attempts,
                            e
                        );
                    }

                    if self.policy.exhausted(attempts) {
                        return Err(ConnectError::RetriesExhausted {
                            target: self.dialer.target().to_string(),
                            attempts,
                            last: e,
                        });
                    }

                    let delay = self.policy.delay();
                    debug!("Retrying {} in {:?}", self.dialer.target(), delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// The live outbound session, if any.
    pub async fn current(&self) -> Option<Arc<dyn Session>> {
        let current = self.current.lock().await;
        current
            .as_ref()
            .filter(|c| c.session.is_open())
            .map(|c| Arc::clone(&c.session))
    }

    /// Whether a live outbound session exists.
    pub async fn is_connected(&self) -> bool {
        self.current().await.is_some()
    }

    /// Install `session` as the outbound session, closing the previous one.
    pub async fn replace(&self, session: Arc<dyn Session>) {
        let monitor = tokio::spawn(monitor(Arc::clone(&session)));
        let previous = self.current.lock().await.replace(Current { session, monitor });

        if let Some(previous) = previous {
            previous.monitor.abort();
            let _ = previous.session.close().await;
        }
    }

    /// Mark `session` dead. No-op if it was already replaced.
    pub async fn invalidate(&self, session: &Arc<dyn Session>) {
        let mut current = self.current.lock().await;
        let is_current = current
            .as_ref()
            .map(|c| Arc::ptr_eq(&c.session, session))
            .unwrap_or(false);

        if is_current {
            if let Some(dead) = current.take() {
                debug!("Invalidated outbound session to {}", dead.session.peer());
                dead.monitor.abort();
            }
        }
        drop(current);

        let _ = session.close().await;
    }

    /// The current live session, establishing one first if needed.
    pub async fn outbound(&self) -> Result<Arc<dyn Session>, ConnectError> {
        if let Some(session) = self.current().await {
            return Ok(session);
        }
        self.establish_outbound().await
    }

    /// Close the outbound session.
    pub async fn shutdown(&self) {
        if let Some(current) = self.current.lock().await.take() {
            current.monitor.abort();
            let _ = current.session.close().await;
        }
    }
}

async fn monitor(session: Arc<dyn Session>) {
    match session.receive().await {
        Ok(msg) => warn!(
            "Unexpected {:?} message from {} on outbound session, closing",
            msg.kind(),
            session.peer()
        ),
        Err(e) => info!("Outbound session to {} ended: {}", session.peer(), e),
    }
    let _ = session.close().await;
}
