//! Command line arguments and node configuration.

use clap::Parser;
use dropsync_core::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::MAX_MESSAGE_SIZE;

#[derive(Parser, Debug, Clone)]
#[command(name = "dropsync")]
#[command(about = "Replicate new files in a drop folder to a peer over mutual TLS")]
pub struct Args {
    /// Name reported on the status page and in logs
    #[arg(long, env = "DROPSYNC_NAME", default_value = "node")]
    pub name: String,

    /// Address to accept peer connections on
    #[arg(long, env = "DROPSYNC_LISTEN", default_value = "0.0.0.0:8443")]
    pub listen: String,

    /// Peer address to replicate to (host:port)
    #[arg(long, env = "DROPSYNC_PEER")]
    pub peer: String,

    /// Folder whose new files are sent to the peer
    #[arg(long, env = "DROPSYNC_WATCH")]
    pub watch: PathBuf,

    /// Folder received files are written to (defaults to --watch)
    #[arg(long, env = "DROPSYNC_DROP_DIR")]
    pub drop_dir: Option<PathBuf>,

    /// PEM certificate chain presented to the peer
    #[arg(long, env = "DROPSYNC_CERT")]
    pub cert: PathBuf,

    /// PEM private key for --cert
    #[arg(long, env = "DROPSYNC_KEY")]
    pub key: PathBuf,

    /// PEM CA certificate(s) the peer's certificate must chain to
    #[arg(long, env = "DROPSYNC_PEER_CA")]
    pub peer_ca: PathBuf,

    /// Seconds between connection attempts
    #[arg(long, env = "DROPSYNC_RETRY_INTERVAL", default_value_t = 5)]
    pub retry_interval_secs: u64,

    /// Give up after this many connection attempts (default: never)
    #[arg(long)]
    pub max_attempts: Option<u32>,

    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub handshake_timeout_secs: u64,

    /// Largest file sent or accepted, in bytes
    #[arg(long, default_value_t = MAX_MESSAGE_SIZE as u64)]
    pub max_file_size: u64,

    #[arg(long, default_value_t = 200)]
    pub debounce_ms: u64,

    /// Do not verify the peer's server certificate (self-signed deployments)
    #[arg(long, env = "DROPSYNC_INSECURE")]
    pub insecure_skip_verify: bool,

    /// Also send files already in the watched folder at startup
    #[arg(long)]
    pub send_existing: bool,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

impl Args {
    pub fn into_config(self) -> NodeConfig {
        let mut retry = RetryPolicy::fixed(Duration::from_secs(self.retry_interval_secs));
        if let Some(max) = self.max_attempts {
            retry = retry.with_max_attempts(max);
        }

        NodeConfig {
            name: self.name,
            listen: self.listen,
            peer: self.peer,
            drop_dir: self.drop_dir.unwrap_or_else(|| self.watch.clone()),
            watch_dir: self.watch,
            cert: self.cert,
            key: self.key,
            peer_ca: self.peer_ca,
            retry,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            max_file_size: self.max_file_size,
            debounce: Duration::from_millis(self.debounce_ms),
            insecure_skip_verify: self.insecure_skip_verify,
            send_existing: self.send_existing,
        }
    }
}

/// Everything a node needs to run.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub listen: String,
    pub peer: String,
    pub watch_dir: PathBuf,
    pub drop_dir: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub peer_ca: PathBuf,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_file_size: u64,
    pub debounce: Duration,
    pub insecure_skip_verify: bool,
    pub send_existing: bool,
}

impl NodeConfig {
    /// Config with defaults for everything but addresses, folder and identity.
    /// The drop folder is the watched folder.
    pub fn new(
        name: impl Into<String>,
        listen: impl Into<String>,
        peer: impl Into<String>,
        watch_dir: PathBuf,
        cert: PathBuf,
        key: PathBuf,
        peer_ca: PathBuf,
    ) -> Self {
        Self {
            name: name.into(),
            listen: listen.into(),
            peer: peer.into(),
            drop_dir: watch_dir.clone(),
            watch_dir,
            cert,
            key,
            peer_ca,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            max_file_size: MAX_MESSAGE_SIZE as u64,
            debounce: Duration::from_millis(200),
            insecure_skip_verify: false,
            send_existing: false,
        }
    }

    /// Whether received files land in the watched folder.
    pub fn shares_folder(&self) -> bool {
        self.watch_dir == self.drop_dir
    }
}
