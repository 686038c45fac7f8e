//! Polling payload codec.
//!
//! HTTP long-polling batches several packets into one request or response
//! body. Two framings exist, chosen per connection:
//!
//! - **Binary** (default): `[kind] [length digits as raw bytes 0..9] [0xFF] [packet]`
//!   where `kind` is `0x00` for text packets and `0x01` for binary packets.
//! - **Text** (client asked for `b64`): `<decimal length>:<packet>` where binary
//!   packets are carried as `b<digit><base64>`.
//!
//! Lengths count the bytes of the encoded packet, header included. The decoder
//! picks the framing per frame from its first byte, so a body may mix both.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{decode_packet, encode_packet_base64_into, encode_packet_into};
use crate::error::DecodeError;
use crate::packet::{MessageKind, Packet};

const LENGTH_TERMINATOR: u8 = 0xFF;
const TEXT_SEPARATOR: u8 = b':';
/// Upper bound on length digits; anything longer cannot be a sane HTTP body.
const MAX_LENGTH_DIGITS: usize = 19;

/// Framing used for a polling connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Binary,
    Text,
}

impl PayloadFormat {
    /// `Content-Type` for response bodies in this framing.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Binary => "application/octet-stream",
            Self::Text => "text/plain; charset=UTF-8",
        }
    }
}

/// Accumulates finished packets into one payload.
#[derive(Debug, Default)]
pub struct PayloadEncoder {
    format: PayloadFormat,
    buf: BytesMut,
    packets: usize,
}

impl PayloadEncoder {
    pub fn new(format: PayloadFormat) -> Self {
        Self {
            format,
            buf: BytesMut::new(),
            packets: 0,
        }
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// Number of packets buffered since the last [`take`](Self::take).
    pub fn len(&self) -> usize {
        self.packets
    }

    pub fn is_empty(&self) -> bool {
        self.packets == 0
    }

    /// Append one packet as a frame.
    pub fn push(&mut self, packet: &Packet) {
        match self.format {
            PayloadFormat::Binary => {
                let marker = match packet.kind {
                    MessageKind::Text => 0,
                    MessageKind::Binary => 1,
                };
                self.buf.put_u8(marker);
                let length = 1 + packet.data.len();
                for digit in length.to_string().bytes() {
                    self.buf.put_u8(digit - b'0');
                }
                self.buf.put_u8(LENGTH_TERMINATOR);
                encode_packet_into(packet, &mut self.buf);
            }
            PayloadFormat::Text => {
                let mut frame = BytesMut::with_capacity(1 + packet.data.len());
                encode_packet_base64_into(packet, &mut frame);
                self.buf
                    .extend_from_slice(frame.len().to_string().as_bytes());
                self.buf.put_u8(TEXT_SEPARATOR);
                self.buf.extend_from_slice(&frame);
            }
        }
        self.packets += 1;
    }

    /// Drain everything buffered so far, leaving the encoder empty.
    pub fn take(&mut self) -> Bytes {
        self.packets = 0;
        self.buf.split().freeze()
    }
}

/// Iterates the packets of one payload body.
///
/// After the first error the iterator is exhausted.
#[derive(Debug)]
pub struct PayloadDecoder {
    buf: Bytes,
}

impl PayloadDecoder {
    pub fn new(body: Bytes) -> Self {
        Self { buf: body }
    }

    fn next_frame(&mut self) -> Result<Packet, DecodeError> {
        match self.buf[0] {
            marker @ (0 | 1) => self.next_binary_frame(marker),
            b'0'..=b'9' => self.next_text_frame(),
            other => Err(DecodeError::InvalidFrameMarker(other)),
        }
    }

    fn next_binary_frame(&mut self, marker: u8) -> Result<Packet, DecodeError> {
        let kind = if marker == 1 {
            MessageKind::Binary
        } else {
            MessageKind::Text
        };

        let mut length: usize = 0;
        let mut pos = 1;
        loop {
            let byte = *self.buf.get(pos).ok_or(DecodeError::UnexpectedEof)?;
            pos += 1;
            if byte == LENGTH_TERMINATOR {
                break;
            }
            if byte > 9 || pos > MAX_LENGTH_DIGITS + 1 {
                return Err(DecodeError::InvalidLength);
            }
            length = length * 10 + byte as usize;
        }
        if pos == 2 {
            return Err(DecodeError::InvalidLength);
        }

        let frame = self.split_frame(pos, length)?;
        decode_packet(kind, frame)
    }

    fn next_text_frame(&mut self) -> Result<Packet, DecodeError> {
        let separator = self
            .buf
            .iter()
            .position(|b| *b == TEXT_SEPARATOR)
            .ok_or(DecodeError::UnexpectedEof)?;
        let digits = &self.buf[..separator];
        if digits.len() > MAX_LENGTH_DIGITS || !digits.iter().all(u8::is_ascii_digit) {
            return Err(DecodeError::InvalidLength);
        }
        let length = digits
            .iter()
            .fold(0usize, |acc, d| acc * 10 + (d - b'0') as usize);

        let frame = self.split_frame(separator + 1, length)?;
        decode_packet(MessageKind::Text, frame)
    }

    /// Cut `length` bytes starting at `start` off the front of the buffer.
    fn split_frame(&mut self, start: usize, length: usize) -> Result<Bytes, DecodeError> {
        let end = start
            .checked_add(length)
            .ok_or(DecodeError::InvalidLength)?;
        if self.buf.len() < end {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut frame = self.buf.split_to(end);
        Ok(frame.split_off(start))
    }
}

impl Iterator for PayloadDecoder {
    type Item = Result<Packet, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        let result = self.next_frame();
        if result.is_err() {
            self.buf.clear();
        }
        Some(result)
    }
}

/// Decode a whole body. An empty body yields no packets.
pub fn decode_payload(body: Bytes) -> Result<Vec<Packet>, DecodeError> {
    PayloadDecoder::new(body).collect()
}
