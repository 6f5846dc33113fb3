//! dropsync-core: runtime-agnostic pieces of the drop folder replication link.
//!
//! This crate provides:
//! - The `Session` and `Dialer` trait abstractions over a message-framed link
//! - The Transfer Unit protocol (name frame, then content frame)
//! - File name sanitization for the receiving side
//! - The outbound retry policy
//! - A `FileSystem` trait with an in-memory implementation for tests

pub mod fs;
pub mod name;
pub mod protocol;
pub mod retry;
pub mod transport;

pub use fs::{FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use name::{sanitize_name, NameError};
pub use protocol::{
    recv_unit, send_unit, ProtocolError, ReceiveError, SendStage, TransferUnit, UnitDecoder,
    UnitSendError,
};
pub use retry::RetryPolicy;
pub use transport::{
    Dialer, Direction, MemorySession, Message, MessageKind, Session, TransportError,
};
