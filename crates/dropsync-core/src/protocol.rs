//! Transfer Unit protocol.
//!
//! Each replicated file travels as exactly two messages on one session:
//! a Text message carrying the base name, then a Binary message carrying
//! the full content. There is no correlation id or length prefix, so the
//! pairing relies on a single writer per session.

use crate::transport::{Message, Session, TransportError};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// One replicated file: its name and its full content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferUnit {
    pub name: String,
    pub content: Vec<u8>,
}

/// Message sequencing violations. Each one is fatal to the session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Received {0} bytes of content without a preceding name")]
    ContentWithoutName(usize),

    #[error("Received name {next:?} while content for {pending:?} was expected")]
    NameWithoutContent { pending: String, next: String },
}

/// Reassembles Transfer Units from a stream of messages.
#[derive(Debug, Default)]
pub struct UnitDecoder {
    pending_name: Option<String>,
}

impl UnitDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next message. Returns a unit once its content arrives.
    pub fn push(&mut self, msg: Message) -> Result<Option<TransferUnit>, ProtocolError> {
        match (self.pending_name.take(), msg) {
            (None, Message::Text(name)) => {
                self.pending_name = Some(name);
                Ok(None)
            }
            (Some(name), Message::Binary(content)) => Ok(Some(TransferUnit { name, content })),
            (None, Message::Binary(content)) => Err(ProtocolError::ContentWithoutName(content.len())),
            (Some(pending), Message::Text(next)) => {
                Err(ProtocolError::NameWithoutContent { pending, next })
            }
        }
    }
}

/// Which half of a unit a send failure hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStage {
    Name,
    Content,
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendStage::Name => write!(f, "name"),
            SendStage::Content => write!(f, "content"),
        }
    }
}

#[derive(Debug, Error)]
#[error("Failed to send {stage} of {name}: {source}")]
pub struct UnitSendError {
    pub stage: SendStage,
    pub name: String,
    #[source]
    pub source: TransportError,
}

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Send one unit: the name, then the content.
///
/// Content is not attempted when the name write fails. The caller must not
/// send anything else on `session` while this future is running.
pub async fn send_unit(
    session: &dyn Session,
    name: &str,
    content: &[u8],
) -> Result<(), UnitSendError> {
    session
        .send_text(name)
        .await
        .map_err(|source| UnitSendError {
            stage: SendStage::Name,
            name: name.to_string(),
            source,
        })?;

    session
        .send_binary(content)
        .await
        .map_err(|source| UnitSendError {
            stage: SendStage::Content,
            name: name.to_string(),
            source,
        })
}

/// Receive the next complete unit from `session`.
pub async fn recv_unit(session: &dyn Session) -> Result<TransferUnit, ReceiveError> {
    let mut decoder = UnitDecoder::new();
    loop {
        let msg = session.receive().await?;
        if let Some(unit) = decoder.push(msg)? {
            debug!(
                "Received unit {} ({} bytes) from {}",
                unit.name,
                unit.content.len(),
                session.peer()
            );
            return Ok(unit);
        }
    }
}
