//! Tracker module
//!
//! HTTP announce client: reports progress to the tracker and collects
//! peer endpoints in return.

pub mod client;

// Re-export main types
pub use client::{AnnounceEvent, AnnounceResponse, Tracker, ANNOUNCE_TIMEOUT};
