//! Piece manager
//!
//! Owns the download plan: which blocks are missing, pending or
//! retrieved, which peer claims which pieces, and the output file.
//! Verified pieces are written at their offset immediately; block
//! payloads are released afterwards so memory stays bounded by the
//! pieces currently in flight.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, error, info, trace, warn};

use crate::error::TorrentError;
use crate::peer::Bitfield;
use crate::storage::piece::{BlockStatus, Piece};
use crate::torrent::Metainfo;

/// How long a requested block may stay unanswered before it is handed
/// back to the pool and may be re-requested from any peer
pub const PENDING_TIMEOUT: Duration = Duration::from_secs(5);

/// A peer is identified by the 20-byte ID from its handshake
pub type PeerId = [u8; 20];

/// A block request handed to a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub piece_index: u32,
    pub offset: u32,
    pub length: u32,
}

/// Plans block requests, verifies pieces and assembles the output file
pub struct PieceManager {
    /// All pieces in index order
    pieces: Vec<Piece>,
    /// Claimed bitfield per connected peer
    peers: HashMap<PeerId, Bitfield>,
    /// Outstanding requests: (piece, offset) -> (peer, issued at)
    pending: HashMap<(u32, u32), (PeerId, Instant)>,
    /// Output file, pre-sized to the torrent length
    output: File,
    output_path: PathBuf,
    piece_length: u64,
    total_length: u64,
    pending_timeout: Duration,
    /// A failed output write ends the session; latched for the orchestrator
    fatal: Option<TorrentError>,
}

impl PieceManager {
    /// Create the piece set and the output file under `output_dir`
    pub fn new(metainfo: &Metainfo, output_dir: &Path) -> Result<Self> {
        let pieces = metainfo
            .pieces
            .iter()
            .enumerate()
            .map(|(index, hash)| Piece::new(index as u32, metainfo.piece_len(index as u32), *hash))
            .collect::<Vec<_>>();

        std::fs::create_dir_all(output_dir).map_err(|e| {
            error!("Failed to create output directory '{}': {}", output_dir.display(), e);
            TorrentError::storage_error_full(
                "Failed to create output directory",
                output_dir.display().to_string(),
                e.to_string(),
            )
        })?;

        let output_path = output_dir.join(&metainfo.name);
        let output = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&output_path)
            .map_err(|e| {
                error!("Failed to create output file '{}': {}", output_path.display(), e);
                TorrentError::storage_error_full(
                    "Failed to create output file",
                    output_path.display().to_string(),
                    e.to_string(),
                )
            })?;
        output.set_len(metainfo.length).map_err(|e| {
            TorrentError::storage_error_full(
                "Failed to size output file",
                output_path.display().to_string(),
                e.to_string(),
            )
        })?;

        info!(
            "Piece manager ready: {} pieces, writing to {}",
            pieces.len(),
            output_path.display()
        );
        Ok(Self {
            pieces,
            peers: HashMap::new(),
            pending: HashMap::new(),
            output,
            output_path,
            piece_length: metainfo.piece_length,
            total_length: metainfo.length,
            pending_timeout: PENDING_TIMEOUT,
            fatal: None,
        })
    }

    /// Register a peer's claimed bitfield; replaces any previous one
    pub fn add_peer(&mut self, peer_id: PeerId, bitfield: Bitfield) {
        debug!(
            "Peer {} claims {}/{} pieces",
            hex::encode(peer_id),
            bitfield.count(),
            self.pieces.len()
        );
        self.peers.insert(peer_id, bitfield);
    }

    /// Record a `have` announcement from a peer
    pub fn update_peer(&mut self, peer_id: &PeerId, piece_index: u32) {
        match self.peers.get_mut(peer_id) {
            Some(bitfield) => bitfield.set(piece_index as usize),
            None => trace!("Have from unregistered peer {}", hex::encode(peer_id)),
        }
    }

    /// Drop a peer; every block pending on it returns to Missing
    pub fn remove_peer(&mut self, peer_id: &PeerId) {
        if self.peers.remove(peer_id).is_none() {
            return;
        }

        let held: Vec<(u32, u32)> = self
            .pending
            .iter()
            .filter(|(_, (holder, _))| holder == peer_id)
            .map(|(key, _)| *key)
            .collect();
        for key in &held {
            self.pending.remove(key);
            self.reset_block(key.0, key.1);
        }

        debug!(
            "Removed peer {}, recycled {} pending blocks",
            hex::encode(peer_id),
            held.len()
        );
    }

    /// Pick the next block to request from the given peer
    ///
    /// Expired pending requests are swept back to Missing first, then
    /// pieces are scanned in index order for the lowest-offset Missing
    /// block the peer can serve. Returns None when the peer has nothing
    /// we still need.
    pub fn next_request(&mut self, peer_id: &PeerId) -> Option<BlockRequest> {
        self.sweep_expired();

        if !self.peers.contains_key(peer_id) {
            return None;
        }

        for i in 0..self.pieces.len() {
            if self.pieces[i].is_complete() {
                continue;
            }
            if !self.peers[peer_id].has(i) {
                continue;
            }
            if let Some(block) = self.pieces[i].next_missing() {
                block.status = BlockStatus::Pending;
                let request = BlockRequest {
                    piece_index: i as u32,
                    offset: block.offset,
                    length: block.length,
                };
                self.pending
                    .insert((request.piece_index, request.offset), (*peer_id, Instant::now()));
                return Some(request);
            }
        }
        None
    }

    /// Store a block delivered by a peer
    ///
    /// Completes, verifies and writes out the piece when this was its
    /// last block. An `Err` here is session-fatal (output write failed);
    /// per-peer oddities are logged and swallowed.
    pub fn block_received(
        &mut self,
        peer_id: &PeerId,
        piece_index: u32,
        offset: u32,
        data: Vec<u8>,
    ) -> Result<()> {
        debug!(
            "Received block {}+{} ({} bytes) from peer {}",
            piece_index,
            offset,
            data.len(),
            hex::encode(peer_id)
        );
        self.pending.remove(&(piece_index, offset));

        let ready = {
            let Some(piece) = self.pieces.get_mut(piece_index as usize) else {
                warn!("Block for nonexistent piece {}", piece_index);
                return Ok(());
            };
            if piece.is_complete() {
                trace!("Late block for already verified piece {}", piece_index);
                return Ok(());
            }
            let Some(block) = piece.block_mut(offset) else {
                warn!("Block at unknown offset {} in piece {}", offset, piece_index);
                return Ok(());
            };
            if data.len() != block.length as usize {
                warn!(
                    "Block {}+{} has wrong length: expected {}, got {}",
                    piece_index,
                    offset,
                    block.length,
                    data.len()
                );
                block.status = BlockStatus::Missing;
                block.data = None;
                return Ok(());
            }

            block.status = BlockStatus::Retrieved;
            block.data = Some(data);
            piece.all_retrieved()
        };

        if ready {
            let piece = &self.pieces[piece_index as usize];
            let assembled = piece.assemble();
            if piece.hash_matches(&assembled) {
                self.write_piece(piece_index, &assembled)?;
                self.pieces[piece_index as usize].mark_complete();
                info!(
                    "{} / {} pieces downloaded ({:.1}%)",
                    self.completed_count(),
                    self.pieces.len(),
                    self.progress() * 100.0
                );
            } else {
                warn!("Discarding corrupt piece {}", piece_index);
                self.pieces[piece_index as usize].reset();
            }
        }
        Ok(())
    }

    /// True once every piece is verified
    pub fn complete(&self) -> bool {
        self.pieces.iter().all(|p| p.is_complete())
    }

    /// Bytes verified so far (whole pieces only)
    pub fn bytes_downloaded(&self) -> u64 {
        self.pieces
            .iter()
            .filter(|p| p.is_complete())
            .map(|p| p.length())
            .sum()
    }

    /// Bytes still to download
    pub fn bytes_left(&self) -> u64 {
        self.total_length - self.bytes_downloaded()
    }

    /// Number of pieces in the torrent
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Number of verified pieces
    pub fn completed_count(&self) -> usize {
        self.pieces.iter().filter(|p| p.is_complete()).count()
    }

    /// Download progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.pieces.is_empty() {
            1.0
        } else {
            self.completed_count() as f64 / self.pieces.len() as f64
        }
    }

    /// Flush the finished file to disk
    pub fn finish(&mut self) -> Result<()> {
        self.output.sync_all().map_err(|e| {
            TorrentError::storage_error_full(
                "Failed to sync output file",
                self.output_path.display().to_string(),
                e.to_string(),
            )
        })?;
        info!(
            "Wrote {} bytes to {}",
            self.total_length,
            self.output_path.display()
        );
        Ok(())
    }

    /// Take the session-fatal error, if an output write has failed
    pub fn take_fatal(&mut self) -> Option<TorrentError> {
        self.fatal.take()
    }

    /// Override the pending-request timeout (tests use a zero timeout)
    pub fn set_pending_timeout(&mut self, timeout: Duration) {
        self.pending_timeout = timeout;
    }

    /// Return blocks whose requests have outlived the timeout to Missing
    fn sweep_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<(u32, u32)> = self
            .pending
            .iter()
            .filter(|(_, (_, issued))| now.duration_since(*issued) >= self.pending_timeout)
            .map(|(key, _)| *key)
            .collect();

        for key in expired {
            self.pending.remove(&key);
            debug!("Request for block {}+{} expired, re-queueing", key.0, key.1);
            self.reset_block(key.0, key.1);
        }
    }

    fn reset_block(&mut self, piece_index: u32, offset: u32) {
        if let Some(block) = self
            .pieces
            .get_mut(piece_index as usize)
            .and_then(|p| p.block_mut(offset))
        {
            if block.status == BlockStatus::Pending {
                block.status = BlockStatus::Missing;
            }
        }
    }

    fn write_piece(&mut self, piece_index: u32, data: &[u8]) -> Result<()> {
        let position = piece_index as u64 * self.piece_length;
        trace!(
            "Writing piece {} ({} bytes) at offset {}",
            piece_index,
            data.len(),
            position
        );

        let result = self
            .output
            .seek(SeekFrom::Start(position))
            .and_then(|_| self.output.write_all(data));
        if let Err(e) = result {
            let err = TorrentError::storage_error_full(
                format!("Failed to write piece {}", piece_index),
                self.output_path.display().to_string(),
                e.to_string(),
            );
            error!("{}", err);
            self.fatal = Some(err.clone());
            return Err(err.into());
        }
        Ok(())
    }
}
