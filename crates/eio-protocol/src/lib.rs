//! Engine.IO protocol types
//!
//! Wire-level building blocks shared by every transport:
//! - the packet model (type byte + message kind + payload),
//! - the single-packet codec used by framed transports (websocket),
//! - the payload codec that batches packets for HTTP long-polling,
//! - the OPEN handshake body and protocol error codes.
//!
//! Nothing in this crate performs I/O.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod packet;
pub mod payload;

pub use codec::{decode_packet, encode_packet};
pub use error::{DecodeError, EngineErrorCode, ProtocolError};
pub use handshake::{HandshakeError, HandshakeParams};
pub use packet::{MessageKind, Packet, PacketType};
pub use payload::{PayloadDecoder, PayloadEncoder, PayloadFormat, decode_payload};

/// Protocol revision spoken by this implementation.
pub const PROTOCOL_VERSION: u8 = 3;
