//! BitTorrent wire protocol module
//!
//! Handshake framing, the peer message codec and the restartable stream
//! parser that turns a raw byte flow into messages.

pub mod handshake;
pub mod message;
pub mod stream;

// Re-export main types
pub use handshake::{Handshake, HANDSHAKE_LEN, PROTOCOL_STRING};
pub use message::{Message, MessageId};
pub use stream::StreamParser;
