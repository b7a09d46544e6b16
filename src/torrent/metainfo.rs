//! Torrent metainfo structure
//!
//! The parsed, immutable description of a single-file torrent.

use anyhow::Result;
use sha1::{Digest, Sha1};

use crate::error::TorrentError;

/// Metadata of a single-file torrent, immutable after parsing
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Tracker announce URL
    pub announce: String,
    /// SHA1 hash of the bencoded `info` dictionary, byte-exact
    pub info_hash: [u8; 20],
    /// Size of each piece in bytes (the last piece may be shorter)
    pub piece_length: u64,
    /// Expected SHA1 digest of each piece, in index order
    pub pieces: Vec<[u8; 20]>,
    /// File name
    pub name: String,
    /// Total file size in bytes
    pub length: u64,
}

impl Metainfo {
    /// Number of pieces in the torrent
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Byte length of piece `index`
    ///
    /// All pieces are `piece_length` long except possibly the last.
    pub fn piece_len(&self, index: u32) -> u64 {
        let start = index as u64 * self.piece_length;
        self.piece_length.min(self.length.saturating_sub(start))
    }

    /// Expected digest of piece `index`
    pub fn piece_hash(&self, index: usize) -> Option<[u8; 20]> {
        self.pieces.get(index).copied()
    }

    /// Info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Hash the raw bencoded `info` dictionary bytes
    pub fn compute_info_hash(info_bytes: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        hasher.finalize().into()
    }

    /// Split the concatenated `pieces` string into 20-byte digests
    pub fn parse_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>> {
        if pieces_bytes.len() % 20 != 0 {
            return Err(TorrentError::metainfo_error_with_field(
                format!(
                    "pieces length must be a multiple of 20, got {}",
                    pieces_bytes.len()
                ),
                "pieces",
            )
            .into());
        }

        let mut pieces = Vec::with_capacity(pieces_bytes.len() / 20);
        for chunk in pieces_bytes.chunks_exact(20) {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            pieces.push(hash);
        }
        Ok(pieces)
    }
}
