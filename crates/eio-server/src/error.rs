//! Server-side error types.

use eio_protocol::HandshakeError;
use eio_transport::TransportError;

/// Errors surfaced to the application or to the HTTP entry point by a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A transport switch is in progress; retry the write shortly.
    #[error("session is upgrading")]
    Upgrading,

    /// The session is closing or closed.
    #[error("end of stream")]
    EndOfStream,

    #[error("invalid transport: {0}")]
    InvalidTransport(String),

    #[error("transport upgrades are disabled")]
    UpgradeNotAllowed,

    /// A text message must be valid UTF-8; send raw bytes as binary.
    #[error("text message is not valid UTF-8")]
    InvalidText,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upgrading)
    }
}

/// Errors building or starting an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport configuration: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid listen address: {0}")]
    Address(#[from] std::net::AddrParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
