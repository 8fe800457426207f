//! # Swarm Coordinator
//!
//! Downloads the selected pieces from every known peer at once.
//!
//! ## Multi-threading Architecture
//!
//! - **Coordinator thread**: spawns the workers, draws the progress bar,
//!   detects completion and collects worker outcomes
//! - **Worker threads**: one per peer, each owning a [`PeerSession`] over a
//!   [`TcpTransport`]
//! - **Piece storage**: shared queue and output file, behind one mutex
//! - **Event channel**: workers report how they ended
//!
//! ## Completion
//!
//! Every progress tick the coordinator checks whether all selected pieces are
//! saved. Once they are, or once a worker reports a fatal error, every
//! session is terminated. The coordinator returns after all workers have
//! been joined.

use crate::config::Context;
use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::session::{PeerSession, SessionHandle};
use crate::storage::PieceStorage;
use crate::transport::TcpTransport;
use crate::worker::{Outcome, Worker, WorkerEvent};

use crossbeam_channel::{unbounded, RecvTimeoutError};
use indicatif::{ProgressBar, ProgressStyle};

use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Outcome of a swarm download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Number of pieces selected for download
    pub selected: usize,
    /// Indices of the pieces written to disk, in completion order
    pub saved: Vec<u32>,
    /// Workers whose session terminated normally
    pub completed_peers: usize,
    /// Workers that exhausted their attempts
    pub failed_peers: usize,
}

impl DownloadReport {
    /// Whether every selected piece was saved.
    pub fn is_complete(&self) -> bool {
        self.saved.len() >= self.selected
    }
}

/// Coordinator of the peer workers of one download.
pub struct Swarm {
    context: Arc<Context>,
    storage: Arc<PieceStorage>,
    show_progress: bool,
}

impl Swarm {
    /// Creates a coordinator.
    ///
    /// # Arguments
    ///
    /// * `context` - Identity and configuration of the download.
    /// * `storage` - Piece queue and output file shared by the sessions.
    ///
    pub fn new(context: Arc<Context>, storage: Arc<PieceStorage>) -> Self {
        Swarm {
            context,
            storage,
            show_progress: true,
        }
    }

    /// Disable the progress bar, for non-interactive use.
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Storage shared by the sessions.
    pub fn storage(&self) -> &Arc<PieceStorage> {
        &self.storage
    }

    /// Download from `peers` until every selected piece is saved or every
    /// worker has ended.
    ///
    /// A fatal error reported by a worker stops the download and is returned
    /// once all workers are joined.
    pub fn download(&self, peers: &[Peer]) -> Result<DownloadReport> {
        info!(
            "Downloading {} pieces from {} peers",
            self.storage.selected_pieces_count(),
            peers.len()
        );

        let (sender, receiver) = unbounded::<WorkerEvent>();
        let mut handles: Vec<SessionHandle> = Vec::with_capacity(peers.len());
        let mut threads: Vec<JoinHandle<PeerSession<TcpTransport>>> =
            Vec::with_capacity(peers.len());

        for peer in peers {
            let transport = TcpTransport::new(peer.addr, &self.context.config);
            let session = PeerSession::new(
                *peer,
                transport,
                self.context.clone(),
                self.storage.clone(),
            );
            let worker = Worker::new(session, self.context.config.max_attempts, sender.clone());
            handles.push(worker.handle());

            let thread = thread::Builder::new()
                .name(format!("peer-{}", peer.id))
                .spawn(move || worker.run())?;
            threads.push(thread);
        }
        drop(sender);

        let progress = self.progress_bar();

        let mut report = DownloadReport {
            selected: self.storage.selected_pieces_count(),
            ..Default::default()
        };
        let mut fatal: Option<Error> = None;
        let mut running = threads.len();
        let mut stopping = false;

        while running > 0 {
            match receiver.recv_timeout(self.context.config.progress_interval) {
                Ok(WorkerEvent { peer, outcome }) => {
                    running -= 1;
                    match outcome {
                        Outcome::Completed => report.completed_peers += 1,
                        Outcome::GaveUp(e) => {
                            debug!("Peer {} dropped out: {}", peer, e);
                            report.failed_peers += 1;
                        }
                        Outcome::Fatal(e) => {
                            report.failed_peers += 1;
                            if fatal.is_none() {
                                fatal = Some(e);
                            }
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            progress.set_position(self.storage.pieces_saved_count() as u64);

            if !stopping && (fatal.is_some() || self.storage.is_complete()) {
                info!("Stopping {} remaining sessions", running);
                for handle in &handles {
                    handle.terminate();
                }
                stopping = true;
            }
        }

        for thread in threads {
            if thread.join().is_err() {
                error!("A worker thread panicked");
            }
        }

        progress.set_position(self.storage.pieces_saved_count() as u64);
        progress.finish();

        if let Some(e) = fatal {
            return Err(e);
        }

        report.saved = self.storage.saved_indices();
        info!(
            "Saved {}/{} pieces ({} peers completed, {} failed)",
            report.saved.len(),
            report.selected,
            report.completed_peers,
            report.failed_peers
        );

        Ok(report)
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new(self.storage.selected_pieces_count() as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {pos}/{len} pieces [{bar:40.cyan/blue}] {percent}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        progress.set_style(style);
        progress
    }
}
