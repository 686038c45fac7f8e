//! Protocol error codes returned to HTTP clients, and codec errors.

use serde::{Deserialize, Serialize};

/// Engine error codes carried in the JSON body of a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCode {
    UnknownTransport,
    UnknownSid,
    BadHandshakeMethod,
    BadRequest,
    Forbidden,
    UnsupportedProtocolVersion,

    Custom(i32),
}

impl EngineErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::UnknownTransport => 0,
            Self::UnknownSid => 1,
            Self::BadHandshakeMethod => 2,
            Self::BadRequest => 3,
            Self::Forbidden => 4,
            Self::UnsupportedProtocolVersion => 5,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::UnknownTransport,
            1 => Self::UnknownSid,
            2 => Self::BadHandshakeMethod,
            3 => Self::BadRequest,
            4 => Self::Forbidden,
            5 => Self::UnsupportedProtocolVersion,
            c => Self::Custom(c),
        }
    }

    /// Canonical message for the code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnknownTransport => "Transport unknown",
            Self::UnknownSid => "Session ID unknown",
            Self::BadHandshakeMethod => "Bad handshake method",
            Self::BadRequest => "Bad request",
            Self::Forbidden => "Forbidden",
            Self::UnsupportedProtocolVersion => "Unsupported protocol version",
            Self::Custom(_) => "Error",
        }
    }
}

/// JSON error body: `{"code": 0, "message": "Transport unknown"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: i32,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: EngineErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
        }
    }

    pub fn unknown_transport() -> Self {
        Self::from(EngineErrorCode::UnknownTransport)
    }

    pub fn unknown_sid() -> Self {
        Self::from(EngineErrorCode::UnknownSid)
    }

    pub fn bad_handshake_method() -> Self {
        Self::from(EngineErrorCode::BadHandshakeMethod)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(EngineErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(EngineErrorCode::Forbidden, message)
    }

    pub fn error_code(&self) -> EngineErrorCode {
        EngineErrorCode::from_code(self.code)
    }
}

impl From<EngineErrorCode> for ProtocolError {
    fn from(code: EngineErrorCode) -> Self {
        Self::new(code, code.message())
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Engine error [{}]: {}", self.code, self.message)
    }
}

impl std::error::Error for ProtocolError {}

/// Failure to parse a packet or a polling payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid packet type byte 0x{0:02x}")]
    InvalidPacketType(u8),

    #[error("invalid payload frame marker 0x{0:02x}")]
    InvalidFrameMarker(u8),

    #[error("invalid payload length")]
    InvalidLength,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}
