//! # Tern
//!
//! Download core of a BitTorrent client: peer transport, wire protocol,
//! piece bookkeeping and the per-peer session state machine, driven by a
//! multi-threaded swarm coordinator.
//!
//! ## Architecture
//!
//! - **Tracker**: discovers peers over HTTP
//! - **Swarm**: spawns one worker thread per peer and watches progress
//! - **Peer sessions**: handshake, bitfield and block requests over a
//!   [`transport::Transport`]
//! - **Piece storage**: shared queue of pieces and the preallocated output
//!   file
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use tern::config::{Config, Context, PeerId};
//! use tern::storage::PieceStorage;
//! use tern::swarm::Swarm;
//! use tern::torrent::TorrentFile;
//! use tern::tracker::Tracker;
//!
//! # fn main() -> anyhow::Result<()> {
//! let torrent = TorrentFile::open(Path::new("debian.iso.torrent"))?;
//! let context = Arc::new(Context::new(PeerId::generate(), torrent.info_hash, Config::default()));
//!
//! let peers = Tracker::new()?.fetch_peers(&torrent, &context.peer_id, context.config.port)?;
//! let storage = Arc::new(PieceStorage::new(&torrent, Path::new("."), 100)?);
//! let report = Swarm::new(context, storage.clone()).download(&peers)?;
//! storage.close_output()?;
//!
//! println!("{} pieces saved", report.saved.len());
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod bitfield;
pub mod config;
pub mod error;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod piece;
pub mod session;
pub mod storage;
pub mod swarm;
pub mod torrent;
pub mod tracker;
pub mod transport;
pub mod worker;

pub use error::{Error, Result};
