//! remora
//!
//! A lean, leech-only BitTorrent client: parses a single-file metainfo,
//! announces to an HTTP tracker, runs a bounded pool of peer connections
//! and assembles the verified pieces into the output file.

pub mod bencode;
pub mod cli;
pub mod client;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod torrent;
pub mod tracker;

pub use error::TorrentError;

pub use bencode::{Decoder, Value};
pub use client::{ClientOptions, StopHandle, TorrentClient, MAX_PEER_CONNECTIONS};
pub use peer::{Bitfield, PeerConnection, PeerSession};
pub use protocol::{Handshake, Message, StreamParser};
pub use storage::{BlockRequest, PieceManager, BLOCK_SIZE};
pub use torrent::{Metainfo, MetainfoParser};
pub use tracker::{AnnounceEvent, AnnounceResponse, Tracker};

pub use cli::{CliArgs, Config};
