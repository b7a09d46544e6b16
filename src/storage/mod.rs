//! Storage module
//!
//! Pieces, blocks and the piece manager that plans block requests,
//! verifies finished pieces and writes them to the output file.

pub mod manager;
pub mod piece;

// Re-export main types
pub use manager::{BlockRequest, PeerId, PieceManager, PENDING_TIMEOUT};
pub use piece::{Block, BlockStatus, Piece, BLOCK_SIZE};
