// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for console (RCON) packets.
//!
//! Every packet on the TCP stream has the following layout, all integers
//! little-endian:
//! - 4 bytes: packet length (counts every byte after this field)
//! - 4 bytes: request id
//! - 4 bytes: packet type
//! - N bytes: body (ASCII/UTF-8 text)
//! - 2 bytes: NUL terminators

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Request id + packet type.
pub const HEADER_SIZE: usize = 8;

/// Smallest legal value of the length field (header + two terminators).
pub const MIN_PACKET_LEN: usize = HEADER_SIZE + 2;

/// Largest body a server sends in a single packet. Longer responses are
/// split across several packets.
pub const MAX_INBOUND_BODY: usize = 4096;

/// Largest command body servers accept from a client.
pub const MAX_OUTBOUND_BODY: usize = 1446;

/// Packet types used by the console protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PacketType {
    /// Response body for an executed command
    ResponseValue = 0,
    /// Command execution (client → server) or auth response (server → client)
    Command = 2,
    /// Login with the console password
    Auth = 3,
}

impl PacketType {
    /// Type the server uses to answer an [`PacketType::Auth`] packet.
    pub const AUTH_RESPONSE: PacketType = PacketType::Command;
}

impl TryFrom<i32> for PacketType {
    type Error = PacketError;

    fn try_from(value: i32) -> Result<Self, <Self as TryFrom<i32>>::Error> {
        match value {
            0 => Ok(PacketType::ResponseValue),
            2 => Ok(PacketType::Command),
            3 => Ok(PacketType::Auth),
            _ => Err(PacketError::InvalidPacketType(value)),
        }
    }
}

/// Errors that can occur during packet encoding/decoding
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet too large: {0} bytes (max: {max})", max = MAX_INBOUND_BODY + MIN_PACKET_LEN)]
    PacketTooLarge(usize),

    #[error("command body too large: {0} bytes (max: {max})", max = MAX_OUTBOUND_BODY)]
    BodyTooLarge(usize),

    #[error("packet too short: {0} bytes (min: {min})", min = MIN_PACKET_LEN)]
    PacketTooShort(usize),

    #[error("invalid packet type: {0}")]
    InvalidPacketType(i32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

/// A single console packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub packet_type: PacketType,
    pub body: Bytes,
}

impl Packet {
    /// Create an auth packet carrying the console password
    pub fn auth(id: i32, password: &str) -> Result<Self, PacketError> {
        Self::new(id, PacketType::Auth, password)
    }

    /// Create a command packet
    pub fn command(id: i32, command: &str) -> Result<Self, PacketError> {
        Self::new(id, PacketType::Command, command)
    }

    /// Create an empty response-value packet.
    ///
    /// Servers echo this packet back unchanged, which marks the end of a
    /// (possibly fragmented) command response.
    pub fn sentinel(id: i32) -> Self {
        Self {
            id,
            packet_type: PacketType::ResponseValue,
            body: Bytes::new(),
        }
    }

    /// Create a new outbound packet
    pub fn new(id: i32, packet_type: PacketType, body: &str) -> Result<Self, PacketError> {
        if body.len() > MAX_OUTBOUND_BODY {
            return Err(PacketError::BodyTooLarge(body.len()));
        }
        Ok(Self {
            id,
            packet_type,
            body: Bytes::copy_from_slice(body.as_bytes()),
        })
    }

    /// Body as text. Invalid UTF-8 sequences are replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Value of the length field for this packet
    pub fn wire_len(&self) -> usize {
        MIN_PACKET_LEN + self.body.len()
    }

    /// Encode the packet to bytes for wire transmission
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(LENGTH_FIELD_SIZE + self.wire_len());
        self.put_into(&mut buf);
        buf.freeze()
    }

    fn put_into(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.wire_len() as i32);
        buf.put_i32_le(self.id);
        buf.put_i32_le(self.packet_type as i32);
        buf.put_slice(&self.body);
        buf.put_u8(0);
        buf.put_u8(0);
    }

    /// Decode a packet from bytes (length prefix included)
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, PacketError> {
        if bytes.len() < LENGTH_FIELD_SIZE {
            return Err(PacketError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete packet length",
            )));
        }

        let length = checked_length(bytes.get_i32_le())?;
        if bytes.len() < length {
            return Err(PacketError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete packet payload",
            )));
        }

        decode_payload(bytes.split_to(length))
    }
}

/// Validate a raw length field against protocol bounds.
fn checked_length(raw: i32) -> Result<usize, PacketError> {
    if raw < MIN_PACKET_LEN as i32 {
        return Err(PacketError::PacketTooShort(raw.max(0) as usize));
    }
    let length = raw as usize;
    if length > MAX_INBOUND_BODY + MIN_PACKET_LEN {
        return Err(PacketError::PacketTooLarge(length));
    }
    Ok(length)
}

/// Decode id, type and body from a payload of exactly `length` bytes.
fn decode_payload(mut payload: Bytes) -> Result<Packet, PacketError> {
    let id = payload.get_i32_le();
    let packet_type = PacketType::try_from(payload.get_i32_le())?;

    // Drop the two terminators, then any stray padding some servers add.
    let mut body = payload.split_to(payload.len() - 2);
    while body.last() == Some(&0) {
        body.truncate(body.len() - 1);
    }

    Ok(Packet {
        id,
        packet_type,
        body,
    })
}

/// Length-prefixed framing of [`Packet`]s on a byte stream.
///
/// Partial packets stay buffered between reads, so a read abandoned halfway
/// (for example by a timeout) resumes at the same frame boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = PacketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, PacketError> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_FIELD_SIZE];
        length_bytes.copy_from_slice(&src[..LENGTH_FIELD_SIZE]);
        let length = checked_length(i32::from_le_bytes(length_bytes))?;

        let frame_len = LENGTH_FIELD_SIZE + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        decode_payload(src.split_to(length).freeze()).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, PacketError> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            // EOF in the middle of a packet
            None => Err(PacketError::ConnectionClosed),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = PacketError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), PacketError> {
        dst.reserve(LENGTH_FIELD_SIZE + packet.wire_len());
        packet.put_into(dst);
        Ok(())
    }
}
