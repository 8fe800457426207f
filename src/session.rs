//! # Peer Session
//!
//! One session per peer. It connects, exchanges handshakes, learns which
//! pieces the peer has and then downloads blocks of pieces taken from the
//! shared [`PieceStorage`], one block request at a time.
//!
//! ## States
//!
//! ```text
//! Disconnected -> Handshaking -> AwaitingBitfield -> Choked <-> Unchoked -> Terminated
//! ```
//!
//! - **Handshaking**: 68-byte handshake sent, peer's answer must carry the
//!   same protocol string and info hash
//! - **AwaitingBitfield**: keep-alives are skipped, a BITFIELD leads to
//!   `Choked`, an UNCHOKE leads to `Unchoked` with an empty bitfield; INTERESTED
//!   is sent either way
//! - **Choked / Unchoked**: message dispatch loop; after each message, if the
//!   peer has us unchoked and no request is outstanding, the next block is
//!   requested
//! - **Terminated**: no piece left for this peer, or terminated from outside
//!
//! ## Piece Selection
//!
//! When the current piece is complete it is handed to storage, then pieces
//! are popped from the shared queue until one the peer has is found. Pieces
//! the peer lacks are dropped from the queue for this download.
//!
//! A PIECE message must carry exactly the block that was requested; anything
//! else is a protocol error that ends the session.

use crate::bitfield::PeerBitfield;
use crate::config::Context;
use crate::error::{Error, Result};
use crate::handshake::{deserialize_handshake, Handshake, HANDSHAKE_LEN};
use crate::message::{deserialize_message, Message, MessageId};
use crate::peer::Peer;
use crate::piece::Piece;
use crate::storage::PieceStorage;
use crate::transport::Transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Connection state of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    AwaitingBitfield,
    Choked,
    Unchoked,
    Terminated,
}

impl SessionState {
    /// State after receiving a message of kind `id` in the dispatch loop.
    pub fn after(self, id: MessageId) -> SessionState {
        match (self, id) {
            (SessionState::Choked | SessionState::Unchoked, MessageId::Choke) => {
                SessionState::Choked
            }
            (SessionState::Choked | SessionState::Unchoked, MessageId::Unchoke) => {
                SessionState::Unchoked
            }
            (state, _) => state,
        }
    }
}

/// Cancels a session from another thread.
///
/// Termination is observed between two blocking operations of the session.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    terminated: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Ask the session to stop. Idempotent.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Block request awaiting its PIECE message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingBlock {
    offset: u32,
    length: u32,
}

/// Download session with a single peer.
pub struct PeerSession<T: Transport> {
    /// Remote peer
    peer: Peer,
    /// Connection to the peer
    transport: T,
    /// Identity and configuration of the download
    context: Arc<Context>,
    /// Shared piece queue and output file
    storage: Arc<PieceStorage>,
    state: SessionState,
    /// Pieces the peer claims to have
    bitfield: PeerBitfield,
    /// Piece being downloaded from this peer
    piece: Option<Piece>,
    /// Outstanding block request, if any
    pending_block: Option<PendingBlock>,
    /// Peer id received in the handshake
    remote_peer_id: Option<[u8; 20]>,
    handle: SessionHandle,
    /// Whether the last connection attempt failed before the dispatch loop
    failed: bool,
}

impl<T: Transport> PeerSession<T> {
    /// Creates a disconnected session.
    ///
    /// # Arguments
    ///
    /// * `peer` - Peer to download from.
    /// * `transport` - Unconnected transport to the peer.
    /// * `context` - Identity and configuration of the download.
    /// * `storage` - Piece queue and output file shared by all sessions.
    ///
    pub fn new(
        peer: Peer,
        transport: T,
        context: Arc<Context>,
        storage: Arc<PieceStorage>,
    ) -> Self {
        let piece_count = storage.total_pieces_count();

        PeerSession {
            peer,
            transport,
            context,
            storage,
            state: SessionState::Disconnected,
            bitfield: PeerBitfield::new(piece_count),
            piece: None,
            pending_block: None,
            remote_peer_id: None,
            handle: SessionHandle::default(),
            failed: false,
        }
    }

    /// Remote peer of this session.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Current state of the session.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Pieces the peer claims to have.
    pub fn bitfield(&self) -> &PeerBitfield {
        &self.bitfield
    }

    /// Peer id received in the last handshake.
    pub fn remote_peer_id(&self) -> Option<&[u8; 20]> {
        self.remote_peer_id.as_ref()
    }

    /// Piece currently downloaded from this peer.
    pub fn piece_in_progress(&self) -> Option<&Piece> {
        self.piece.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Handle to terminate this session from another thread.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Force termination of the session. Idempotent.
    pub fn terminate(&self) {
        self.handle.terminate();
    }

    /// Whether the session ran out of pieces or was terminated.
    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated || self.handle.is_terminated()
    }

    /// Whether the last attempt failed while establishing the connection.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Download from the peer until nothing is left or the session is
    /// terminated.
    ///
    /// On error the connection is closed and the session is left
    /// `Disconnected`; calling `run` again reconnects from scratch.
    pub fn run(&mut self) -> Result<()> {
        while !self.is_terminated() {
            if let Err(e) = self.establish_connection() {
                warn!("Could not establish connection with peer {}: {}", self.peer, e);
                self.failed = true;
                self.disconnect();
                return Err(e);
            }
            self.failed = false;

            if let Err(e) = self.main_loop() {
                warn!("Lost peer {}: {}", self.peer, e);
                self.disconnect();
                return Err(e);
            }
        }

        self.transport.close();
        self.state = SessionState::Terminated;

        Ok(())
    }

    fn disconnect(&mut self) {
        self.transport.close();
        self.state = SessionState::Disconnected;
    }

    fn establish_connection(&mut self) -> Result<()> {
        // Blocks requested over a previous connection will never arrive
        if let Some(piece) = self.piece.as_mut() {
            debug!("Restarting piece {} with peer {}", piece.index(), self.peer);
            piece.reset();
        }
        self.pending_block = None;
        self.bitfield = PeerBitfield::new(self.storage.total_pieces_count());

        self.state = SessionState::Handshaking;
        self.transport.connect()?;
        self.perform_handshake()?;

        self.state = SessionState::AwaitingBitfield;
        self.receive_bitfield()?;
        self.send_interested()?;

        info!("Connection established with peer {}", self.peer);

        Ok(())
    }

    fn perform_handshake(&mut self) -> Result<()> {
        let handshake = Handshake::new(
            *self.context.peer_id.as_bytes(),
            self.context.info_hash,
        );
        self.transport.send(&handshake.serialize())?;

        let response = self.transport.receive(HANDSHAKE_LEN)?;
        let response = deserialize_handshake(&response)?;
        if !handshake.accepts(&response) {
            return Err(Error::protocol("peer answered with another info hash"));
        }

        debug!(
            "Handshake with peer {} ({})",
            self.peer,
            String::from_utf8_lossy(&response.peer_id)
        );
        self.remote_peer_id = Some(response.peer_id);

        Ok(())
    }

    fn receive_bitfield(&mut self) -> Result<()> {
        loop {
            let message = self.receive_message()?;

            match message.id {
                MessageId::KeepAlive => continue,
                MessageId::Unchoke => {
                    self.state = SessionState::Unchoked;
                    return Ok(());
                }
                MessageId::Bitfield => {
                    self.bitfield = PeerBitfield::from_bytes(
                        message.payload,
                        self.storage.total_pieces_count(),
                    );
                    self.state = SessionState::Choked;
                    return Ok(());
                }
                id => {
                    return Err(Error::protocol(format!(
                        "expected BITFIELD from peer, received {}",
                        id
                    )))
                }
            }
        }
    }

    fn send_interested(&mut self) -> Result<()> {
        debug!("Send INTERESTED to peer {}", self.peer);
        self.send_message(&Message::new(MessageId::Interested))
    }

    fn main_loop(&mut self) -> Result<()> {
        while !self.is_terminated() {
            let message = self.receive_message()?;
            self.handle_message(message)?;

            if self.state == SessionState::Unchoked && self.pending_block.is_none() {
                self.request_block()?;
            }
        }

        Ok(())
    }

    /// Apply one message received in the dispatch loop.
    fn handle_message(&mut self, message: Message) -> Result<()> {
        debug!("Receive {} from peer {}", message.id, self.peer);
        self.state = self.state.after(message.id);

        match message.id {
            MessageId::Choke => warn!("Peer {} choked us", self.peer),
            MessageId::Have => {
                let index = message.parse_have()?;
                self.bitfield.set_piece(index)?;
            }
            MessageId::Bitfield => {
                self.bitfield =
                    PeerBitfield::from_bytes(message.payload, self.storage.total_pieces_count());
            }
            MessageId::Piece => {
                let block = message.parse_piece()?;

                let (Some(piece), Some(pending)) = (self.piece.as_mut(), self.pending_block) else {
                    return Err(Error::protocol(format!(
                        "received block of piece {} without request",
                        block.index
                    )));
                };

                if block.index != piece.index() {
                    return Err(Error::protocol(format!(
                        "received block of piece {} while downloading piece {}",
                        block.index,
                        piece.index()
                    )));
                }
                if block.begin != pending.offset || block.data.len() != pending.length as usize {
                    return Err(Error::protocol(format!(
                        "received block {}:{} of {} bytes, requested {}:{} of {} bytes",
                        block.index,
                        block.begin,
                        block.data.len(),
                        block.index,
                        pending.offset,
                        pending.length
                    )));
                }

                debug!(
                    "Download piece {} [{}:{}] from peer {}",
                    block.index,
                    block.begin,
                    block.begin as usize + block.data.len(),
                    self.peer
                );

                piece.save_block(block.begin, block.data.to_vec())?;
                self.pending_block = None;
            }
            _ => {}
        }

        Ok(())
    }

    /// Request the next block, switching pieces when needed.
    ///
    /// Terminates the session when no piece is left for this peer.
    fn request_block(&mut self) -> Result<()> {
        if self
            .piece
            .as_ref()
            .is_some_and(|piece| piece.all_blocks_retrieved())
        {
            if let Some(piece) = self.piece.take() {
                self.storage.piece_processed(piece)?;
            }
        }

        while self.piece.is_none() {
            let Some(piece) = self.storage.next_piece() else {
                break;
            };

            if !self.bitfield.has_piece(piece.index()) {
                debug!("Peer {} does not have piece {}", self.peer, piece.index());
                continue;
            }
            if piece.all_blocks_retrieved() {
                continue;
            }

            self.piece = Some(piece);
        }

        let Some(piece) = self.piece.as_mut() else {
            info!("Nothing left to download from peer {}", self.peer);
            self.state = SessionState::Terminated;
            self.handle.terminate();
            return Ok(());
        };

        let block = piece.first_missing_block()?;
        let pending = PendingBlock {
            offset: block.offset,
            length: block.length,
        };
        let request = Message::request(block.piece, block.offset, block.length);
        debug!(
            "Send REQUEST for piece {} [{}:{}] to peer {}",
            block.piece,
            block.offset,
            block.offset + block.length,
            self.peer
        );

        self.send_message(&request)?;
        self.pending_block = Some(pending);

        Ok(())
    }

    fn receive_message(&mut self) -> Result<Message> {
        let frame = self.transport.receive_frame()?;
        deserialize_message(&frame)
    }

    fn send_message(&mut self, message: &Message) -> Result<()> {
        self.transport.send(&message.serialize())
    }
}
