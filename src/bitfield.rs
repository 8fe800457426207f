//! # Peer Bitfield
//!
//! Record of the pieces a peer claims to have.
//!
//! ```text
//! Byte 0: [piece 0, 1, 2, 3, 4, 5, 6, 7]   (MSB first)
//! Byte 1: [piece 8, 9, 10, 11, 12, 13, 14, 15]
//! ...
//! ```
//!
//! Piece `i` lives in byte `i / 8` at bit `7 - i % 8`. Indices at or past the
//! torrent's piece count are never recorded, so a peer cannot make the
//! bitfield grow beyond the size of the torrent.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBitfield {
    /// Bits as received, MSB first
    bits: Vec<u8>,
    /// Number of pieces in the torrent
    piece_count: usize,
}

impl PeerBitfield {
    /// Creates an empty bitfield: the peer has nothing.
    ///
    /// # Arguments
    ///
    /// * `piece_count` - Number of pieces in the torrent.
    ///
    pub fn new(piece_count: usize) -> Self {
        PeerBitfield {
            bits: vec![],
            piece_count,
        }
    }

    /// Creates the bitfield received in a BITFIELD message.
    ///
    /// # Arguments
    ///
    /// * `bits` - Payload of the message.
    /// * `piece_count` - Number of pieces in the torrent.
    ///
    pub fn from_bytes(bits: Vec<u8>, piece_count: usize) -> Self {
        PeerBitfield { bits, piece_count }
    }

    /// Whether the peer has piece `index`. Out-of-range indices are absent.
    pub fn has_piece(&self, index: u32) -> bool {
        if index as usize >= self.piece_count {
            return false;
        }

        let byte_index = (index / 8) as usize;
        let offset = index % 8;

        match self.bits.get(byte_index) {
            Some(&byte) => byte >> (7 - offset) & 1 != 0,
            None => false,
        }
    }

    /// Mark piece `index` as available, growing the bitfield if needed.
    ///
    /// Fails with a protocol error when `index` is not a piece of the torrent.
    pub fn set_piece(&mut self, index: u32) -> Result<()> {
        if index as usize >= self.piece_count {
            return Err(Error::protocol(format!(
                "peer has piece {} of a torrent with {} pieces",
                index, self.piece_count
            )));
        }

        let byte_index = (index / 8) as usize;
        let offset = index % 8;

        if byte_index >= self.bits.len() {
            self.bits.resize(byte_index + 1, 0);
        }

        self.bits[byte_index] |= 1 << (7 - offset);

        Ok(())
    }

    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Raw bits, MSB first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}
