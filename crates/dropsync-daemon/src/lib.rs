//! dropsync-daemon library: Exposes the node components for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to run whole nodes on loopback.

pub mod config;
pub mod connection;
pub mod echo;
pub mod manager;
pub mod native_fs;
pub mod node;
pub mod outgoing;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod status;
pub mod tls;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use config::{Args, NodeConfig};
pub use connection::WsSession;
pub use echo::EchoGuard;
pub use manager::{ConnectError, ConnectionManager};
pub use native_fs::NativeFs;
pub use node::{Node, NodeError};
pub use outgoing::{DialerError, WssDialer};
pub use receiver::{MaterializeError, Receiver};
pub use sender::{SendError, SendOutcome, Sender};
pub use server::{InboundServer, ServerOptions, StatusSource};
pub use status::{NodeStats, StatusReport};
pub use tls::{Identity, IdentityError, ServerVerification};
pub use watcher::{EntryKind, FileEvent, FileWatcher};
