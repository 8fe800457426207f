//! # Piece Storage
//!
//! State shared by every peer session of a download:
//!
//! - a FIFO queue of pieces not yet handed to a session
//! - the number of pieces currently held by sessions
//! - the indices of pieces written to disk
//! - the preallocated output file
//!
//! All of it sits behind one mutex, held only for the duration of a single
//! operation and never across network I/O. Piece `i` is written at byte
//! `i * piece_length` of the output file.

use crate::error::{Error, Result};
use crate::piece::Piece;
use crate::torrent::TorrentFile;

use sha1::{Digest, Sha1};

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Work queue and output file of one download.
pub struct PieceStorage {
    /// Nominal piece length, the stride of pieces in the output file
    piece_length: u64,
    /// Number of pieces in the torrent
    total_pieces: usize,
    /// Number of pieces selected for download
    selected_pieces: usize,
    /// Path of the output file
    output_path: PathBuf,
    state: Mutex<StorageState>,
}

struct StorageState {
    /// Pieces waiting for a session
    queue: VecDeque<Piece>,
    /// Pieces handed out and not yet processed
    in_progress: usize,
    /// Indices of pieces written to disk, in completion order
    saved: Vec<u32>,
    /// Output file, `None` once closed
    file: Option<File>,
}

impl PieceStorage {
    /// Prepare the download of the first `percent` % of the pieces of
    /// `torrent` into `output_dir`.
    ///
    /// Creates `output_dir` if needed and (re)creates the output file with
    /// the full length of the torrent.
    ///
    /// # Arguments
    ///
    /// * `torrent` - Torrent being downloaded.
    /// * `output_dir` - Directory of the output file.
    /// * `percent` - Share of the pieces to download, from the first one.
    ///
    pub fn new(torrent: &TorrentFile, output_dir: &Path, percent: u8) -> Result<PieceStorage> {
        let total_pieces = torrent.piece_count();
        let selected_pieces = total_pieces * percent.min(100) as usize / 100;

        let queue: VecDeque<Piece> = (0..selected_pieces as u32)
            .map(|index| {
                Piece::new(
                    index,
                    torrent.piece_len(index),
                    torrent.piece_hashes[index as usize],
                )
            })
            .collect();

        info!(
            "Selected {} of {} pieces for download",
            selected_pieces, total_pieces
        );

        fs::create_dir_all(output_dir)?;
        let output_path = output_dir.join(output_file_name(&torrent.name));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&output_path)?;
        file.set_len(torrent.length)?;

        let size = file.metadata()?.len();
        if size != torrent.length {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "could not expand {:?} to {} bytes, got {}",
                    output_path, torrent.length, size
                ),
            )));
        }

        debug!("Created {:?} ({} bytes)", output_path, size);

        Ok(PieceStorage {
            piece_length: torrent.piece_length as u64,
            total_pieces,
            selected_pieces,
            output_path,
            state: Mutex::new(StorageState {
                queue,
                in_progress: 0,
                saved: vec![],
                file: Some(file),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, StorageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the next piece to download, `None` once the queue is empty.
    pub fn next_piece(&self) -> Option<Piece> {
        let mut state = self.state();
        let piece = state.queue.pop_front()?;
        state.in_progress += 1;
        Some(piece)
    }

    /// Write a completed piece to the output file.
    ///
    /// # Arguments
    ///
    /// * `piece` - Piece taken with [`PieceStorage::next_piece`], all blocks retrieved.
    ///
    /// The piece is written whether or not its hash matches.
    pub fn piece_processed(&self, piece: Piece) -> Result<()> {
        if !piece.hash_matches() {
            warn!("Piece {} does not match its hash", piece.index());
        }

        let data = piece.assembled_data();
        let offset = piece.index() as u64 * self.piece_length;

        let mut state = self.state();
        let Some(file) = state.file.as_mut() else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "output file closed",
            )));
        };
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data)?;

        state.in_progress = state.in_progress.saturating_sub(1);
        state.saved.push(piece.index());

        info!(
            "Saved piece {} ({}/{})",
            piece.index(),
            state.saved.len(),
            self.selected_pieces
        );

        Ok(())
    }

    /// Whether every selected piece was handed out.
    pub fn queue_is_empty(&self) -> bool {
        self.state().queue.is_empty()
    }

    /// Number of pieces in the torrent.
    pub fn total_pieces_count(&self) -> usize {
        self.total_pieces
    }

    /// Number of pieces queued for download at construction.
    pub fn selected_pieces_count(&self) -> usize {
        self.selected_pieces
    }

    /// Number of pieces handed out and not yet written.
    pub fn pieces_in_progress_count(&self) -> usize {
        self.state().in_progress
    }

    /// Number of pieces written to the output file.
    pub fn pieces_saved_count(&self) -> usize {
        self.state().saved.len()
    }

    /// Snapshot of the saved piece indices, in completion order.
    pub fn saved_indices(&self) -> Vec<u32> {
        self.state().saved.clone()
    }

    /// Whether every selected piece has been saved.
    pub fn is_complete(&self) -> bool {
        self.pieces_saved_count() >= self.selected_pieces
    }

    /// Path of the output file.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Flush and close the output file. Later writes fail.
    pub fn close_output(&self) -> Result<()> {
        if let Some(mut file) = self.state().file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Output file name for a torrent name: path separators are replaced so the
/// file stays inside the output directory.
pub fn output_file_name(name: &str) -> String {
    let safe_name = name.replace(['/', '\\'], "_");

    if safe_name.trim().is_empty() || safe_name == "." || safe_name == ".." {
        "download".to_string()
    } else {
        safe_name
    }
}

/// Re-read the saved pieces of `path` and return those whose SHA-1 does not
/// match the torrent.
pub fn verify_output(path: &Path, torrent: &TorrentFile, indices: &[u32]) -> Result<Vec<u32>> {
    let mut file = File::open(path)?;
    let mut corrupted = vec![];

    let mut sorted = indices.to_vec();
    sorted.sort_unstable();

    for index in sorted {
        let mut data = vec![0; torrent.piece_len(index) as usize];
        file.seek(SeekFrom::Start(torrent.piece_offset(index)))?;
        file.read_exact(&mut data)?;

        let hash: [u8; 20] = Sha1::digest(&data).into();
        if torrent.piece_hashes.get(index as usize) != Some(&hash) {
            corrupted.push(index);
        }
    }

    Ok(corrupted)
}
