//! One replication node: listener, Receiver, watcher, Sender and the
//! outbound Connection Manager wired together.
//!
//! Both sides of a deployment run the same node with their addresses
//! swapped.

use crate::config::NodeConfig;
use crate::echo::EchoGuard;
use crate::manager::ConnectionManager;
use crate::native_fs::NativeFs;
use crate::outgoing::{DialerError, WssDialer};
use crate::receiver::Receiver;
use crate::sender::{queue_existing, Sender};
use crate::server::{InboundServer, ServerOptions, StatusSource};
use crate::status::NodeStats;
use crate::tls::{Identity, IdentityError, ServerVerification};
use crate::watcher::FileWatcher;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Startup failures. Everything after startup is logged and survived.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Failed to load node identity: {0}")]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Dialer(#[from] DialerError),

    #[error("Failed to create {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to watch folder: {0:#}")]
    Watch(anyhow::Error),
}

pub struct Node {
    config: NodeConfig,
    manager: Arc<ConnectionManager>,
    stats: Arc<NodeStats>,
    echo: Option<EchoGuard>,
    server: InboundServer<NativeFs>,
}

impl Node {
    /// Load the identity, prepare folders and bind the listener.
    pub async fn bind(config: NodeConfig) -> Result<Self, NodeError> {
        let identity = Identity::load(&config.cert, &config.key, &config.peer_ca)?;

        for dir in [&config.watch_dir, &config.drop_dir] {
            std::fs::create_dir_all(dir).map_err(|source| NodeError::Directory {
                path: dir.clone(),
                source,
            })?;
        }

        let max_message_size = usize::try_from(config.max_file_size).unwrap_or(usize::MAX);

        let verification = ServerVerification::from_insecure_flag(config.insecure_skip_verify);
        if verification == ServerVerification::Insecure {
            warn!("Peer server certificate verification is disabled");
        }
        let dialer = WssDialer::new(&config.peer, identity.client_config(verification)?)?
            .with_timeouts(config.connect_timeout, config.handshake_timeout)
            .with_max_message_size(max_message_size);
        let manager = Arc::new(ConnectionManager::new(Box::new(dialer), config.retry.clone()));

        let stats = Arc::new(NodeStats::new());
        let echo = config.shares_folder().then(EchoGuard::new);

        let mut receiver = Receiver::new(NativeFs::new(config.drop_dir.clone()), Arc::clone(&stats));
        if let Some(echo) = &echo {
            receiver = receiver.with_echo_guard(echo.clone());
        }

        let server = InboundServer::bind(
            &config.listen,
            identity.server_config()?,
            receiver,
            StatusSource {
                node: config.name.clone(),
                manager: Arc::clone(&manager),
                stats: Arc::clone(&stats),
            },
            ServerOptions {
                handshake_timeout: config.handshake_timeout,
                max_message_size,
            },
        )
        .await
        .map_err(|source| NodeError::Bind {
            addr: config.listen.clone(),
            source,
        })?;

        Ok(Self {
            config,
            manager,
            stats,
            echo,
            server,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.server.local_addr()
    }

    pub fn stats(&self) -> Arc<NodeStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), NodeError> {
        let Node {
            config,
            manager,
            stats,
            echo,
            server,
        } = self;

        info!(
            "Node {} replicating {} to {}",
            config.name,
            config.watch_dir.display(),
            config.peer
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watch_fs = NativeFs::new(config.watch_dir.clone());

        if config.send_existing {
            match queue_existing(&watch_fs, &event_tx).await {
                Ok(queued) => info!("Queued {} existing file(s)", queued),
                Err(e) => warn!("Failed to list existing files: {}", e),
            }
        }

        let watcher = FileWatcher::start(config.watch_dir.clone(), config.debounce, event_tx)
            .map_err(NodeError::Watch)?;

        let mut sender = Sender::new(watch_fs, Arc::clone(&manager), config.max_file_size, stats);
        if let Some(echo) = echo {
            sender = sender.with_echo_guard(echo);
        }
        let sender_task = tokio::spawn(sender.run(event_rx));

        server.run(shutdown).await;

        sender_task.abort();
        drop(watcher);
        manager.shutdown().await;
        info!("Node {} stopped", config.name);
        Ok(())
    }
}
