//! # Tern BitTorrent Client
//!
//! A command-line BitTorrent client written in Rust.
//!
//! ## Usage
//!
//! ```bash
//! tern <torrent_file>
//! tern <torrent_file> -d <output_dir> -p 50
//! ```
//!
//! The first `percent` % of the pieces are downloaded into a file named after
//! the torrent, preallocated to the torrent's full length. Saved pieces are
//! verified against their hashes once the download ends, unless
//! `--no-verify` is given.

#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

use tern::config::{Config, Context, PeerId, DEFAULT_PORT};
use tern::storage::{verify_output, PieceStorage};
use tern::swarm::Swarm;
use tern::torrent::TorrentFile;
use tern::tracker::Tracker;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A command-line BitTorrent client, written in Rust."
)]
struct Args {
    /// Path to the .torrent file
    torrent: PathBuf,

    /// Directory where the downloaded file is written
    #[arg(short = 'd', long, default_value = ".")]
    dir: PathBuf,

    /// Percentage of the pieces to download, starting from the first one
    #[arg(short = 'p', long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(1..=100))]
    percent: u8,

    /// Deadline for connecting to a peer, in milliseconds
    #[arg(long, default_value_t = 1000)]
    connect_timeout_ms: u64,

    /// Deadline for each read from a peer, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    read_timeout_ms: u64,

    /// Attempts made with each peer before giving up on it
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    attempts: u32,

    /// Port announced to the tracker
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Skip the integrity check of the saved pieces
    #[arg(long)]
    no_verify: bool,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            max_attempts: self.attempts,
            port: self.port,
            ..Config::default()
        }
    }
}

fn run(args: Args) -> Result<()> {
    if !args.torrent.exists() {
        return Err(anyhow!("could not find torrent file: {:?}", args.torrent));
    }

    let torrent = TorrentFile::open(&args.torrent)?;
    info!(
        "Loaded {:?}: {} bytes in {} pieces of {} bytes",
        torrent.name,
        torrent.length,
        torrent.piece_count(),
        torrent.piece_length
    );
    if !torrent.comment.is_empty() {
        info!("Comment: {}", torrent.comment);
    }

    let context = Arc::new(Context::new(
        PeerId::generate(),
        torrent.info_hash,
        args.config(),
    ));
    debug!("Using {:?}", context.peer_id);

    let peers = Tracker::new()?.fetch_peers(&torrent, &context.peer_id, context.config.port)?;

    let storage = Arc::new(PieceStorage::new(&torrent, &args.dir, args.percent)?);
    println!(
        "Downloading {:?} ({} of {} pieces from {} peers)",
        torrent.name,
        storage.selected_pieces_count(),
        storage.total_pieces_count(),
        peers.len()
    );
    let report = Swarm::new(context, storage.clone()).download(&peers)?;
    storage.close_output()?;

    println!(
        "Saved {}/{} pieces in {:?}.",
        report.saved.len(),
        report.selected,
        storage.output_path()
    );

    if !args.no_verify {
        let corrupted = verify_output(storage.output_path(), &torrent, &report.saved)?;
        if !corrupted.is_empty() {
            return Err(anyhow!(
                "{} pieces do not match their hash: {:?}",
                corrupted.len(),
                corrupted
            ));
        }
        println!("All saved pieces match their hash.");
    }

    if !report.is_complete() {
        return Err(anyhow!(
            "download incomplete: {} of {} pieces saved",
            report.saved.len(),
            report.selected
        ));
    }

    Ok(())
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // Parse arguments
    let args = Args::parse();

    // Run program, eventually exit failure
    if let Err(error) = run(args) {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }

    // Exit success
    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["tern", "file.torrent"]);
        assert_eq!(args.dir, PathBuf::from("."));
        assert_eq!(args.percent, 100);
        assert!(!args.no_verify);

        let config = args.config();
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.port, 6881);
    }

    #[test]
    fn percent_is_bounded() {
        assert!(Args::try_parse_from(["tern", "f.torrent", "-p", "0"]).is_err());
        assert!(Args::try_parse_from(["tern", "f.torrent", "-p", "101"]).is_err());

        let args = Args::try_parse_from(["tern", "f.torrent", "-p", "35", "-d", "out"]).unwrap();
        assert_eq!(args.percent, 35);
        assert_eq!(args.dir, PathBuf::from("out"));
    }

    #[test]
    fn timeouts_from_flags() {
        let args = Args::parse_from([
            "tern",
            "f.torrent",
            "--connect-timeout-ms",
            "250",
            "--read-timeout-ms",
            "500",
            "--attempts",
            "5",
            "--no-verify",
        ]);
        let config = args.config();

        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.read_timeout, Duration::from_millis(500));
        assert_eq!(config.max_attempts, 5);
        assert!(args.no_verify);
    }
}
