//! OPEN packet body.
//!
//! Protocol flow:
//!   1. Client issues `GET /engine.io/?transport=polling` (or a websocket upgrade)
//!   2. Server creates a session and sends OPEN with the body below
//!   3. Client keeps talking on the same transport, passing `sid` each time
//!   4. Client may probe an upgrade transport and switch to it

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::packet::{MessageKind, Packet, PacketType};

/// Parameters sent to the client in the OPEN packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    /// Session identifier to pass back as `sid`
    pub sid: String,
    /// Transports the client may upgrade to
    pub upgrades: Vec<String>,
    /// Milliseconds between heartbeat pings
    pub ping_interval: u64,
    /// Milliseconds of silence before the session is closed
    pub ping_timeout: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("expected an OPEN packet, got {0}")]
    NotOpen(PacketType),

    #[error("malformed handshake body: {0}")]
    Json(#[from] serde_json::Error),
}

impl HandshakeParams {
    pub fn new(
        sid: impl Into<String>,
        upgrades: Vec<String>,
        ping_interval: Duration,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            sid: sid.into(),
            upgrades,
            ping_interval: ping_interval.as_millis() as u64,
            ping_timeout: ping_timeout.as_millis() as u64,
        }
    }

    pub fn to_packet(&self) -> Result<Packet, HandshakeError> {
        let body = serde_json::to_vec(self)?;
        Ok(Packet::new(MessageKind::Text, PacketType::Open, body))
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, HandshakeError> {
        if packet.packet_type != PacketType::Open {
            return Err(HandshakeError::NotOpen(packet.packet_type));
        }
        Ok(serde_json::from_slice(&packet.data)?)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }
}
