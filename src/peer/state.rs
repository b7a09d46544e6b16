//! Peer session state
//!
//! The bitfield of pieces a remote claims to have, and the four
//! choke/interest flags every connection starts from.

use anyhow::Result;

use crate::error::TorrentError;

/// A packed bit per piece; bit i set means the peer claims piece i.
///
/// MSB-first within each byte: piece 0 is the highest bit of byte 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    nbits: usize,
}

impl Bitfield {
    /// An all-zero bitfield for `nbits` pieces
    pub fn new(nbits: usize) -> Self {
        Self {
            bits: vec![0u8; nbits.div_ceil(8)],
            nbits,
        }
    }

    /// Wrap raw wire bytes covering `nbits` pieces
    ///
    /// The wire form pads up to a whole byte; anything shorter cannot
    /// describe every piece and is a protocol error.
    pub fn from_bytes(bits: Vec<u8>, nbits: usize) -> Result<Self> {
        if bits.len() < nbits.div_ceil(8) {
            return Err(TorrentError::protocol_error_with_source(
                "Bitfield too short",
                format!("{} bytes for {} pieces", bits.len(), nbits),
            )
            .into());
        }
        Ok(Self { bits, nbits })
    }

    /// Number of pieces the bitfield covers
    pub fn len(&self) -> usize {
        self.nbits
    }

    /// True for a zero-piece torrent
    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    /// Does the peer claim piece `index`?
    pub fn has(&self, index: usize) -> bool {
        if index >= self.nbits {
            return false;
        }
        let byte = self.bits[index / 8];
        (byte >> (7 - (index % 8))) & 1 == 1
    }

    /// Record that the peer announced piece `index`
    pub fn set(&mut self, index: usize) {
        if index < self.nbits {
            self.bits[index / 8] |= 1 << (7 - (index % 8));
        }
    }

    /// Number of pieces claimed
    pub fn count(&self) -> usize {
        (0..self.nbits).filter(|&i| self.has(i)).count()
    }
}

/// State of one live peer connection
///
/// Both sides start choked and uninterested; this client requests at most
/// one block at a time per peer.
#[derive(Debug, Clone)]
pub struct PeerSession {
    /// Remote peer ID, known after the handshake
    pub remote_id: Option<[u8; 20]>,
    /// We're choking them
    pub am_choking: bool,
    /// We're interested
    pub am_interested: bool,
    /// They're choking us
    pub peer_choking: bool,
    /// They're interested
    pub peer_interested: bool,
    /// The single outstanding request: (piece index, block offset)
    pub in_flight: Option<(u32, u32)>,
}

impl PeerSession {
    /// Create the initial session state
    pub fn new() -> Self {
        Self {
            remote_id: None,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            in_flight: None,
        }
    }

    /// True when a new block request may be issued
    pub fn can_request(&self) -> bool {
        self.am_interested && !self.peer_choking && self.in_flight.is_none()
    }
}

impl Default for PeerSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitfield_msb_first() {
        let bf = Bitfield::from_bytes(vec![0b1100_0000], 8).unwrap();
        assert!(bf.has(0));
        assert!(bf.has(1));
        assert!(!bf.has(2));
        assert!(!bf.has(7));
    }

    #[test]
    fn test_bitfield_set() {
        let mut bf = Bitfield::new(10);
        assert!(!bf.has(9));
        bf.set(9);
        assert!(bf.has(9));
        assert_eq!(bf.count(), 1);

        // Out of range is ignored
        bf.set(10);
        assert_eq!(bf.count(), 1);
    }

    #[test]
    fn test_bitfield_out_of_range_has() {
        let bf = Bitfield::from_bytes(vec![0xff], 3).unwrap();
        assert!(bf.has(2));
        assert!(!bf.has(3));
        assert!(!bf.has(100));
    }

    #[test]
    fn test_bitfield_rejects_short_wire_form() {
        assert!(Bitfield::from_bytes(vec![0xff], 9).is_err());
        assert!(Bitfield::from_bytes(vec![0xff, 0x00], 9).is_ok());
    }

    #[test]
    fn test_bitfield_count_spare_bits_ignored() {
        let bf = Bitfield::from_bytes(vec![0xff, 0xff], 12).unwrap();
        assert_eq!(bf.count(), 12);
    }

    #[test]
    fn test_session_initial_flags() {
        let session = PeerSession::new();
        assert!(session.am_choking);
        assert!(!session.am_interested);
        assert!(session.peer_choking);
        assert!(!session.peer_interested);
        assert!(session.in_flight.is_none());
    }

    #[test]
    fn test_can_request() {
        let mut session = PeerSession::new();
        assert!(!session.can_request());

        session.am_interested = true;
        assert!(!session.can_request());

        session.peer_choking = false;
        assert!(session.can_request());

        session.in_flight = Some((0, 0));
        assert!(!session.can_request());
    }
}
