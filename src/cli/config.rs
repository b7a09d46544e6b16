//! CLI configuration
//!
//! Turns parsed arguments into a validated runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::cli::args::CliArgs;
use crate::client::ClientOptions;

/// Validated configuration for a download session
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the .torrent file
    pub torrent_file: PathBuf,
    /// Download directory
    pub output_dir: PathBuf,
    /// Port reported to the tracker
    pub port: u16,
    /// Maximum number of peer connections
    pub max_peers: usize,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        let output_dir = args
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("./downloads"));

        Self {
            torrent_file: args.torrent_file.clone(),
            output_dir,
            port: args.port,
            max_peers: args.max_peers,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow::anyhow!("port cannot be 0"));
        }
        if self.max_peers == 0 {
            return Err(anyhow::anyhow!("max_peers must be at least 1"));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("output_dir cannot be empty"));
        }
        Ok(())
    }

    /// Session options for the client core
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            output_dir: self.output_dir.clone(),
            port: self.port,
            max_peers: self.max_peers,
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_args() -> CliArgs {
        CliArgs {
            torrent_file: PathBuf::from("test.torrent"),
            output_dir: None,
            port: 6889,
            max_peers: 40,
            verbose: false,
            quiet: false,
        }
    }

    #[test]
    fn test_default_output_dir() {
        let config = Config::from_args(&sample_args());
        assert_eq!(config.output_dir, PathBuf::from("./downloads"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = Config::from_args(&sample_args());
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_peers() {
        let mut config = Config::from_args(&sample_args());
        config.max_peers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_options() {
        let config = Config::from_args(&sample_args());
        let options = config.client_options();
        assert_eq!(options.max_peers, 40);
        assert_eq!(options.port, 6889);
    }
}
