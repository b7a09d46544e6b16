//! Peer message stream parser
//!
//! Turns an arbitrarily chunked byte flow into protocol messages. Bytes
//! are pushed as they arrive from the socket; complete frames are popped
//! one at a time and partial frames stay buffered across reads, so frame
//! boundaries never need to line up with read boundaries.

use anyhow::Result;
use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::protocol::Message;

/// Restartable pull-based framer over an incoming byte stream
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: BytesMut,
}

impl StreamParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self { buffer: BytesMut::new() }
    }

    /// Append bytes read from the stream
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        trace!("Buffered {} bytes ({} total)", data.len(), self.buffer.len());
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Parse the next complete message out of the buffer
    ///
    /// Returns `Ok(None)` when the buffer holds no complete frame yet.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }

        let length =
            u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                as usize;

        if length == 0 {
            self.buffer.advance(4);
            return Ok(Some(Message::KeepAlive));
        }

        if self.buffer.len() < 4 + length {
            trace!(
                "Incomplete frame: have {} of {} bytes",
                self.buffer.len(),
                4 + length
            );
            return Ok(None);
        }

        let frame = &self.buffer[..4 + length];
        let message = Message::decode(frame)?;
        self.buffer.advance(4 + length);
        Ok(Some(message))
    }
}
