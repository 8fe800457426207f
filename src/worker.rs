//! # Peer Worker
//!
//! A worker drives the session of a single peer on its own thread. It runs
//! the session up to `max_attempts` times:
//!
//! - a session that terminates normally (nothing left to download, or
//!   terminated by the coordinator) ends the worker
//! - a retryable error (connection, timeout, protocol) starts a new attempt
//!   on the same session, which reconnects from scratch
//! - any other error is fatal to the whole download and is reported as such
//!
//! There is no delay between attempts other than the transport deadlines.
//! Whatever happens, the outcome is reported to the coordinator over a
//! channel before the worker returns.

use crate::error::Error;
use crate::peer::Peer;
use crate::session::{PeerSession, SessionHandle};
use crate::transport::Transport;

use crossbeam_channel::Sender;

/// How a worker ended.
#[derive(Debug)]
pub enum Outcome {
    /// The session terminated normally.
    Completed,
    /// Every attempt failed with a retryable error; carries the last one.
    GaveUp(Error),
    /// A non-retryable error that must abort the download.
    Fatal(Error),
}

/// Final report of a worker.
#[derive(Debug)]
pub struct WorkerEvent {
    pub peer: Peer,
    pub outcome: Outcome,
}

pub struct Worker<T: Transport> {
    session: PeerSession<T>,
    max_attempts: u32,
    events: Sender<WorkerEvent>,
}

impl<T: Transport> Worker<T> {
    pub fn new(session: PeerSession<T>, max_attempts: u32, events: Sender<WorkerEvent>) -> Self {
        Worker {
            session,
            max_attempts: max_attempts.max(1),
            events,
        }
    }

    /// Handle to terminate the worker's session.
    pub fn handle(&self) -> SessionHandle {
        self.session.handle()
    }

    /// Run the session until it terminates or its attempts are exhausted.
    ///
    /// Returns the session so callers can inspect its final state.
    pub fn run(mut self) -> PeerSession<T> {
        let peer = *self.session.peer();
        let outcome = self.attempt_download();

        match &outcome {
            Outcome::Completed => info!("Worker of peer {} finished", peer),
            Outcome::GaveUp(e) => warn!("Giving up on peer {}: {}", peer, e),
            Outcome::Fatal(e) => error!("Download aborted by peer {}: {}", peer, e),
        }

        // The coordinator may already be gone when it stopped early
        if self.events.send(WorkerEvent { peer, outcome }).is_err() {
            debug!("Coordinator stopped listening before peer {} finished", peer);
        }

        self.session
    }

    fn attempt_download(&mut self) -> Outcome {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.session.run() {
                Ok(()) => return Outcome::Completed,
                Err(e) if !e.is_retryable() => return Outcome::Fatal(e),
                Err(_) if self.session.is_terminated() => return Outcome::Completed,
                Err(e) if attempt >= self.max_attempts => return Outcome::GaveUp(e),
                Err(e) => {
                    warn!(
                        "Attempt {}/{} with peer {} failed, retrying: {}",
                        attempt,
                        self.max_attempts,
                        self.session.peer(),
                        e
                    );
                }
            }
        }
    }
}
