//! BitTorrent handshake
//!
//! The fixed 68-byte exchange that opens every peer connection.

use anyhow::Result;
use bytes::{BufMut, BytesMut};
use rand::Rng;
use tracing::{debug, trace, warn};

use crate::error::TorrentError;

/// BitTorrent protocol identifier string
pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// Length of the protocol string
pub const PROTOCOL_LENGTH: u8 = 19;

/// Total size of an encoded handshake
pub const HANDSHAKE_LEN: usize = 68;

/// BitTorrent handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Torrent info hash
    pub info_hash: [u8; 20],
    /// Sender's peer ID
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Create a new handshake with info_hash and peer_id
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Generate a session peer ID: `-PC0001-` followed by 12 random digits
    pub fn generate_peer_id() -> [u8; 20] {
        let mut rng = rand::thread_rng();
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(b"-PC0001-");
        for byte in peer_id[8..].iter_mut() {
            *byte = b'0' + rng.gen_range(0..10u8);
        }
        debug!("Generated peer ID: {}", String::from_utf8_lossy(&peer_id));
        peer_id
    }

    /// Serialize the handshake to its 68-byte wire form
    pub fn encode(&self) -> Vec<u8> {
        trace!("Encoding handshake");
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL_LENGTH);
        buf.put_slice(PROTOCOL_STRING.as_bytes());
        buf.put_slice(&[0u8; 8]); // Reserved bytes
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.to_vec()
    }

    /// Deserialize a handshake from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        trace!("Decoding handshake from {} bytes", data.len());

        if data.len() < HANDSHAKE_LEN {
            return Err(TorrentError::protocol_error_with_source(
                "Handshake too short",
                format!("expected {} bytes, got {}", HANDSHAKE_LEN, data.len()),
            )
            .into());
        }

        if data[0] != PROTOCOL_LENGTH {
            return Err(TorrentError::protocol_error_with_source(
                "Invalid protocol length",
                format!("expected {}, got {}", PROTOCOL_LENGTH, data[0]),
            )
            .into());
        }

        if &data[1..20] != PROTOCOL_STRING.as_bytes() {
            return Err(TorrentError::protocol_error("Invalid protocol string").into());
        }

        // Reserved bytes (data[20..28]) carry extension flags we do not use
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Self { info_hash, peer_id })
    }

    /// Validate the handshake against the session's info hash
    pub fn validate(&self, expected_info_hash: &[u8; 20]) -> bool {
        if self.info_hash != *expected_info_hash {
            warn!(
                "Handshake info hash mismatch: expected {}, got {}",
                hex::encode(expected_info_hash),
                hex::encode(self.info_hash)
            );
            return false;
        }
        true
    }
}
