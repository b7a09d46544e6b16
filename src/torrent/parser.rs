//! Torrent file parser
//!
//! Extracts a [`Metainfo`] from bencoded .torrent data. The info hash is
//! computed over the raw bytes of the `info` value exactly as they appear
//! in the input, using the decoder's byte spans; the dictionary is never
//! re-encoded for hashing.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::bencode::Decoder;
use crate::error::TorrentError;
use crate::torrent::Metainfo;

/// Parser for .torrent files
pub struct MetainfoParser;

impl MetainfoParser {
    /// Parse a .torrent file from a file path
    pub fn parse_file(path: &Path) -> Result<Metainfo> {
        info!("Loading torrent file from: {}", path.display());

        let data = std::fs::read(path).map_err(|e| {
            error!("Failed to read torrent file '{}': {}", path.display(), e);
            TorrentError::storage_error_full(
                "Failed to read torrent file",
                path.display().to_string(),
                e.to_string(),
            )
        })?;

        debug!("Read {} bytes from torrent file", data.len());
        Self::parse_bytes(&data)
    }

    /// Parse a .torrent file from bytes
    pub fn parse_bytes(data: &[u8]) -> Result<Metainfo> {
        let mut decoder = Decoder::new(data);
        let entries = decoder.decode_dict_spans()?;
        if decoder.remaining() > 0 {
            warn!(
                "Torrent file has {} trailing bytes after the top-level dictionary",
                decoder.remaining()
            );
        }

        let mut announce_span = None;
        let mut info_span = None;
        for (key, span) in &entries {
            match key.as_slice() {
                b"announce" => announce_span = Some(span.clone()),
                b"info" => info_span = Some(span.clone()),
                _ => {}
            }
        }

        let announce_span = announce_span.ok_or_else(|| {
            TorrentError::metainfo_error_with_field("missing field", "announce")
        })?;
        let announce = Decoder::new(&data[announce_span])
            .decode()?
            .as_str()
            .ok_or_else(|| {
                TorrentError::metainfo_error_with_field("announce must be a UTF-8 string", "announce")
            })?
            .to_string();

        let info_span = info_span
            .ok_or_else(|| TorrentError::metainfo_error_with_field("missing field", "info"))?;
        let info_bytes = &data[info_span];
        let info = Decoder::new(info_bytes).decode()?;
        if info.as_dict().is_none() {
            return Err(
                TorrentError::metainfo_error_with_field("info must be a dictionary", "info").into(),
            );
        }

        // Multi-file torrents carry a `files` list instead of `length`
        if info.get(b"files").is_some() {
            return Err(
                TorrentError::unsupported_torrent("multi-file torrents are not supported").into(),
            );
        }

        let name = info
            .get(b"name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TorrentError::metainfo_error_with_field("missing field", "name"))?
            .to_string();

        let piece_length = info
            .get(b"piece length")
            .and_then(|v| v.as_int())
            .ok_or_else(|| {
                TorrentError::metainfo_error_with_field("missing field", "piece length")
            })?;
        if piece_length <= 0 {
            return Err(TorrentError::metainfo_error_with_field(
                "piece length must be positive",
                "piece length",
            )
            .into());
        }
        let piece_length = piece_length as u64;

        let length = info
            .get(b"length")
            .and_then(|v| v.as_int())
            .ok_or_else(|| TorrentError::metainfo_error_with_field("missing field", "length"))?;
        if length < 0 {
            return Err(TorrentError::metainfo_error_with_field(
                "length must be non-negative",
                "length",
            )
            .into());
        }
        let length = length as u64;

        let pieces_bytes = info
            .get(b"pieces")
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| TorrentError::metainfo_error_with_field("missing field", "pieces"))?;
        let pieces = Metainfo::parse_piece_hashes(pieces_bytes)?;

        let expected = length.div_ceil(piece_length);
        if expected != pieces.len() as u64 {
            return Err(TorrentError::metainfo_error_with_field(
                format!(
                    "{} bytes in {}-byte pieces needs {} hashes, found {}",
                    length,
                    piece_length,
                    expected,
                    pieces.len()
                ),
                "pieces",
            )
            .into());
        }

        let info_hash = Metainfo::compute_info_hash(info_bytes);

        let metainfo = Metainfo {
            announce,
            info_hash,
            piece_length,
            pieces,
            name,
            length,
        };
        info!(
            "Parsed torrent '{}': {} bytes in {} pieces, info hash {}",
            metainfo.name,
            metainfo.length,
            metainfo.piece_count(),
            metainfo.info_hash_hex()
        );
        Ok(metainfo)
    }
}
