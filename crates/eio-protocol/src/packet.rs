//! Packet model.

use bytes::Bytes;

/// The seven Engine.IO packet types, tagged by their wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Open = 0,
    Close = 1,
    Ping = 2,
    Pong = 3,
    Message = 4,
    Upgrade = 5,
    Noop = 6,
}

impl PacketType {
    pub const ALL: [PacketType; 7] = [
        Self::Open,
        Self::Close,
        Self::Ping,
        Self::Pong,
        Self::Message,
        Self::Upgrade,
        Self::Noop,
    ];

    /// Raw wire value (`0..=6`).
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Header byte used in text framing: the ASCII digit `'0' + value`.
    pub fn text_byte(self) -> u8 {
        b'0' + self.value()
    }

    /// Header byte used in binary framing: the raw value.
    pub fn binary_byte(self) -> u8 {
        self.value()
    }

    pub fn from_value(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Parse an ASCII digit header.
    pub fn from_text_byte(byte: u8) -> Option<Self> {
        byte.checked_sub(b'0').and_then(Self::from_value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Message => "message",
            Self::Upgrade => "upgrade",
            Self::Noop => "noop",
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a packet's payload is UTF-8 text or opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageKind {
    #[default]
    Text,
    Binary,
}

impl MessageKind {
    pub fn is_binary(self) -> bool {
        self == Self::Binary
    }

    /// Header byte for this packet type under this kind's framing.
    pub fn header_byte(self, packet_type: PacketType) -> u8 {
        match self {
            Self::Text => packet_type.text_byte(),
            Self::Binary => packet_type.binary_byte(),
        }
    }
}

/// One decoded protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: MessageKind,
    pub packet_type: PacketType,
    pub data: Bytes,
}

impl Packet {
    pub fn new(kind: MessageKind, packet_type: PacketType, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            packet_type,
            data: data.into(),
        }
    }

    /// A text packet with an empty payload (CLOSE, NOOP, UPGRADE, ...).
    pub fn control(packet_type: PacketType) -> Self {
        Self::new(MessageKind::Text, packet_type, Bytes::new())
    }

    pub fn message(kind: MessageKind, data: impl Into<Bytes>) -> Self {
        Self::new(kind, PacketType::Message, data)
    }

    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Text, PacketType::Ping, data)
    }

    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Text, PacketType::Pong, data)
    }

    pub fn is(&self, packet_type: PacketType) -> bool {
        self.packet_type == packet_type
    }
}
