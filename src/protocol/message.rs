//! BitTorrent protocol messages
//!
//! Every message after the handshake is framed as
//! `<length:4 BE><id:1><payload>`; a zero-length frame is a keep-alive.

use anyhow::Result;
use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::error::TorrentError;

/// BitTorrent message IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
}

impl MessageId {
    /// Map a wire byte to a known message ID
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageId::Choke),
            1 => Some(MessageId::Unchoke),
            2 => Some(MessageId::Interested),
            3 => Some(MessageId::NotInterested),
            4 => Some(MessageId::Have),
            5 => Some(MessageId::Bitfield),
            6 => Some(MessageId::Request),
            7 => Some(MessageId::Piece),
            8 => Some(MessageId::Cancel),
            9 => Some(MessageId::Port),
            _ => None,
        }
    }
}

/// BitTorrent protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
    Port { listen_port: u16 },
    /// Message with an ID this client does not know; skipped, never fatal
    Unknown { id: u8 },
}

impl Message {
    /// Get the message ID (None for KeepAlive)
    pub fn message_id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke as u8),
            Message::Unchoke => Some(MessageId::Unchoke as u8),
            Message::Interested => Some(MessageId::Interested as u8),
            Message::NotInterested => Some(MessageId::NotInterested as u8),
            Message::Have { .. } => Some(MessageId::Have as u8),
            Message::Bitfield { .. } => Some(MessageId::Bitfield as u8),
            Message::Request { .. } => Some(MessageId::Request as u8),
            Message::Piece { .. } => Some(MessageId::Piece as u8),
            Message::Cancel { .. } => Some(MessageId::Cancel as u8),
            Message::Port { .. } => Some(MessageId::Port as u8),
            Message::Unknown { id } => Some(*id),
        }
    }

    /// Frame length excluding the 4-byte length prefix
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested
            | Message::Unknown { .. } => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bitfield } => 1 + bitfield.len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len() as u32,
            Message::Port { .. } => 3,
        }
    }

    /// Serialize the message to bytes, including the length prefix
    pub fn encode(&self) -> Vec<u8> {
        trace!("Encoding message: {:?}", self.message_id());
        let mut buf = BytesMut::with_capacity(4 + self.length() as usize);
        buf.put_u32(self.length());

        if let Some(id) = self.message_id() {
            buf.put_u8(id);
        }
        match self {
            Message::Have { piece_index } => buf.put_u32(*piece_index),
            Message::Bitfield { bitfield } => buf.put_slice(bitfield),
            Message::Request { index, begin, length }
            | Message::Cancel { index, begin, length } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            Message::Port { listen_port } => buf.put_u16(*listen_port),
            _ => {}
        }

        buf.to_vec()
    }

    /// Deserialize a complete frame, including the length prefix
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = BytesMut::from(data);

        if buf.len() < 4 {
            return Err(TorrentError::protocol_error("Frame shorter than length prefix").into());
        }
        let length = buf.get_u32() as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if buf.remaining() < length {
            return Err(TorrentError::protocol_error_with_source(
                "Truncated frame",
                format!("length prefix {}, payload {}", length, buf.remaining()),
            )
            .into());
        }

        let id = buf.get_u8();
        let Some(message_id) = MessageId::from_byte(id) else {
            trace!("Unknown message id {}", id);
            return Ok(Message::Unknown { id });
        };

        match message_id {
            MessageId::Choke => Ok(Message::Choke),
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if buf.remaining() < 4 {
                    return Err(Self::short_payload("Have", 4, buf.remaining()));
                }
                Ok(Message::Have { piece_index: buf.get_u32() })
            }
            MessageId::Bitfield => Ok(Message::Bitfield {
                bitfield: buf[..length - 1].to_vec(),
            }),
            MessageId::Request => {
                if buf.remaining() < 12 {
                    return Err(Self::short_payload("Request", 12, buf.remaining()));
                }
                Ok(Message::Request {
                    index: buf.get_u32(),
                    begin: buf.get_u32(),
                    length: buf.get_u32(),
                })
            }
            MessageId::Piece => {
                if buf.remaining() < 8 {
                    return Err(Self::short_payload("Piece", 8, buf.remaining()));
                }
                let index = buf.get_u32();
                let begin = buf.get_u32();
                let block = buf[..length - 9].to_vec();
                Ok(Message::Piece { index, begin, block })
            }
            MessageId::Cancel => {
                if buf.remaining() < 12 {
                    return Err(Self::short_payload("Cancel", 12, buf.remaining()));
                }
                Ok(Message::Cancel {
                    index: buf.get_u32(),
                    begin: buf.get_u32(),
                    length: buf.get_u32(),
                })
            }
            MessageId::Port => {
                if buf.remaining() < 2 {
                    return Err(Self::short_payload("Port", 2, buf.remaining()));
                }
                Ok(Message::Port { listen_port: buf.get_u16() })
            }
        }
    }

    fn short_payload(name: &str, expected: usize, got: usize) -> anyhow::Error {
        TorrentError::protocol_error_with_source(
            format!("{} message too short", name),
            format!("expected {} bytes, got {}", expected, got),
        )
        .into()
    }
}
