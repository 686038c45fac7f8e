//! Single-packet codec.
//!
//! A framed transport (websocket) carries exactly one packet per frame. The
//! frame kind tells us how to read the one-byte header:
//!
//! | frame  | header                     | payload                 |
//! |--------|----------------------------|-------------------------|
//! | text   | ASCII digit `'0' + type`   | UTF-8 text              |
//! | text   | `b` + ASCII digit          | base64 of binary data   |
//! | binary | raw type byte `0..=6`      | raw bytes               |
//! | binary | ASCII digit `'0' + type`   | text carried as binary  |

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::packet::{MessageKind, Packet, PacketType};

/// Prefix marking base64-encoded binary data inside a text frame.
pub const BASE64_PREFIX: u8 = b'b';

/// Decode one packet from a complete frame.
///
/// The payload is a zero-copy slice of `frame` except for base64 data, which
/// has to be decoded into a fresh buffer.
pub fn decode_packet(kind: MessageKind, frame: Bytes) -> Result<Packet, DecodeError> {
    let header = *frame.first().ok_or(DecodeError::UnexpectedEof)?;

    match kind {
        MessageKind::Text if header == BASE64_PREFIX => {
            let type_byte = *frame.get(1).ok_or(DecodeError::UnexpectedEof)?;
            let packet_type = PacketType::from_text_byte(type_byte)
                .ok_or(DecodeError::InvalidPacketType(type_byte))?;
            let data = STANDARD.decode(&frame[2..])?;
            Ok(Packet::new(MessageKind::Binary, packet_type, data))
        }
        MessageKind::Text => {
            let packet_type =
                PacketType::from_text_byte(header).ok_or(DecodeError::InvalidPacketType(header))?;
            Ok(Packet::new(MessageKind::Text, packet_type, frame.slice(1..)))
        }
        MessageKind::Binary => {
            if let Some(packet_type) = PacketType::from_value(header) {
                Ok(Packet::new(MessageKind::Binary, packet_type, frame.slice(1..)))
            } else if let Some(packet_type) = PacketType::from_text_byte(header) {
                Ok(Packet::new(MessageKind::Text, packet_type, frame.slice(1..)))
            } else {
                Err(DecodeError::InvalidPacketType(header))
            }
        }
    }
}

/// Encode one packet as a frame of `packet.kind`.
pub fn encode_packet(packet: &Packet) -> Bytes {
    let mut out = BytesMut::with_capacity(1 + packet.data.len());
    encode_packet_into(packet, &mut out);
    out.freeze()
}

/// Append the header byte and payload of `packet` to `out`.
pub fn encode_packet_into(packet: &Packet, out: &mut BytesMut) {
    out.put_u8(packet.kind.header_byte(packet.packet_type));
    out.extend_from_slice(&packet.data);
}

/// Append `packet` in text-only form: binary payloads become `b<digit><base64>`.
pub fn encode_packet_base64_into(packet: &Packet, out: &mut BytesMut) {
    match packet.kind {
        MessageKind::Text => encode_packet_into(packet, out),
        MessageKind::Binary => {
            out.put_u8(BASE64_PREFIX);
            out.put_u8(packet.packet_type.text_byte());
            out.extend_from_slice(STANDARD.encode(&packet.data).as_bytes());
        }
    }
}
