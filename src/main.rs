//! remora - Main entry point
//!
//! Parses arguments, loads the torrent and runs the download session on
//! a single-threaded runtime; ctrl-c aborts the session cleanly.

use anyhow::{Context, Result};
use remora::{CliArgs, Config, Metainfo, MetainfoParser, TorrentClient};
use tracing::{debug, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("remora starting");
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args);
    config.validate().context("Invalid configuration")?;

    let metainfo = MetainfoParser::parse_file(&config.torrent_file)
        .context("Failed to load torrent file")?;
    display_torrent_info(&metainfo, &config);

    let mut client = TorrentClient::new(metainfo, config.client_options())
        .context("Failed to initialize session")?;

    // First ctrl-c stops the session at the next suspension point
    let stop = client.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            stop.stop();
        }
    });

    client.start().await.context("Download failed")?;

    info!("remora finished");
    Ok(())
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.verbose {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

/// Print a summary of what is about to be downloaded
fn display_torrent_info(metainfo: &Metainfo, config: &Config) {
    println!("Torrent Information:");
    println!("  Name: {}", metainfo.name);
    println!("  Size: {} bytes", metainfo.length);
    println!("  Pieces: {}", metainfo.piece_count());
    println!("  Piece length: {} bytes", metainfo.piece_length);
    println!("  Info hash: {}", metainfo.info_hash_hex());
    println!("  Tracker: {}", metainfo.announce);
    println!();
    println!("Configuration:");
    println!("  Output directory: {}", config.output_dir.display());
    println!("  Reported port: {}", config.port);
    println!("  Max peer connections: {}", config.max_peers);
    println!();
}
