//! Torrent metainfo module
//!
//! Parsing of .torrent files and the immutable metadata they describe.

pub mod metainfo;
pub mod parser;

// Re-export main types
pub use metainfo::Metainfo;
pub use parser::MetainfoParser;
