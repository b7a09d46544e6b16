//! CLI module
//!
//! Command-line shell around the torrent client core.

pub mod args;
pub mod config;

pub use args::CliArgs;
pub use config::Config;
