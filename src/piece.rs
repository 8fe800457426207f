//! # BitTorrent Piece Management
//!
//! Pieces are the verification units of the torrent data. Each one is
//! downloaded as a sequence of fixed-size blocks (16 KiB, the last block of a
//! piece may be shorter) that are requested and received individually.
//!
//! ## Block Lifecycle
//!
//! ```text
//! Missing --first_missing_block--> Pending --save_block--> Retrieved
//!    ^                                                         |
//!    +------------------------- reset -------------------------+
//! ```
//!
//! A piece is complete once every block is retrieved; its assembled data can
//! then be checked against the SHA-1 hash from the torrent metadata.

use crate::error::{Error, Result};

use sha1::{Digest, Sha1};

/// Size of a requested block (16 KiB).
pub const BLOCK_SIZE: u32 = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Missing,
    Pending,
    Retrieved,
}

/// A block of a piece, the unit requested from peers.
#[derive(Debug, Clone)]
pub struct Block {
    /// Index of the owning piece
    pub piece: u32,
    /// Byte offset within the piece
    pub offset: u32,
    /// Length in bytes
    pub length: u32,
    pub status: BlockStatus,
    /// Received bytes, present once retrieved
    pub data: Option<Vec<u8>>,
}

/// A piece being downloaded.
#[derive(Debug, Clone)]
pub struct Piece {
    /// Zero-based index of this piece in the torrent
    index: u32,
    /// Length of the piece in bytes
    length: u32,
    /// Expected SHA-1 digest of the piece data
    hash: [u8; 20],
    /// Blocks covering `[0, length)` in offset order
    blocks: Vec<Block>,
}

impl Piece {
    /// Creates a piece split into blocks of `BLOCK_SIZE`, all missing.
    ///
    /// # Arguments
    ///
    /// * `index` - Zero-based index of the piece in the torrent.
    /// * `length` - Length of the piece in bytes.
    /// * `hash` - Expected SHA-1 digest of the piece data.
    ///
    pub fn new(index: u32, length: u32, hash: [u8; 20]) -> Piece {
        let block_count = length.div_ceil(BLOCK_SIZE);

        let blocks = (0..block_count)
            .map(|number| {
                let offset = number * BLOCK_SIZE;
                Block {
                    piece: index,
                    offset,
                    length: BLOCK_SIZE.min(length - offset),
                    status: BlockStatus::Missing,
                    data: None,
                }
            })
            .collect();

        Piece {
            index,
            length,
            hash,
            blocks,
        }
    }

    /// Zero-based index of the piece.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Length of the piece in bytes.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Expected SHA-1 digest of the piece data.
    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    /// Blocks of the piece, in offset order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Select the first missing block and mark it pending.
    ///
    /// Callers check [`Piece::all_blocks_retrieved`] first: a piece without
    /// missing blocks has nothing left to request.
    pub fn first_missing_block(&mut self) -> Result<&Block> {
        let block = self
            .blocks
            .iter_mut()
            .find(|block| block.status == BlockStatus::Missing)
            .ok_or(Error::State("piece has no missing block"))?;

        block.status = BlockStatus::Pending;
        Ok(&*block)
    }

    /// Store the data of the block starting at `offset`.
    ///
    /// The data must have exactly the block's length. Saving a block twice
    /// overwrites the first copy.
    pub fn save_block(&mut self, offset: u32, data: Vec<u8>) -> Result<()> {
        let index = self.index;
        let block = self
            .blocks
            .iter_mut()
            .find(|block| block.offset == offset)
            .ok_or_else(|| {
                Error::protocol(format!("piece {} has no block at offset {}", index, offset))
            })?;

        if data.len() != block.length as usize {
            return Err(Error::protocol(format!(
                "block {}:{} of {} bytes, expected {}",
                index,
                offset,
                data.len(),
                block.length
            )));
        }

        block.data = Some(data);
        block.status = BlockStatus::Retrieved;

        Ok(())
    }

    /// Whether every block was received. Pending blocks do not count.
    pub fn all_blocks_retrieved(&self) -> bool {
        self.blocks
            .iter()
            .all(|block| block.status == BlockStatus::Retrieved)
    }

    /// Concatenated block data in offset order.
    ///
    /// Only meaningful once every block is retrieved; missing blocks
    /// contribute nothing.
    pub fn assembled_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.length as usize);
        for block in &self.blocks {
            if let Some(bytes) = &block.data {
                data.extend_from_slice(bytes);
            }
        }
        data
    }

    /// SHA-1 digest of the assembled data.
    pub fn data_hash(&self) -> [u8; 20] {
        Sha1::digest(self.assembled_data()).into()
    }

    /// Verify the integrity of the assembled data against the expected hash.
    pub fn hash_matches(&self) -> bool {
        self.data_hash() == self.hash
    }

    /// Forget all received data so the piece can be downloaded again.
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.data = None;
            block.status = BlockStatus::Missing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha1(data: &[u8]) -> [u8; 20] {
        Sha1::digest(data).into()
    }

    /// Retrieve every block of `piece` with the matching slice of `data`.
    fn fill(piece: &mut Piece, data: &[u8]) {
        while !piece.all_blocks_retrieved() {
            let block = piece.first_missing_block().unwrap();
            let (offset, length) = (block.offset, block.length);
            let end = (offset + length) as usize;
            piece
                .save_block(offset, data[offset as usize..end].to_vec())
                .unwrap();
        }
    }

    #[test]
    fn exact_multiple_of_block_size() {
        let piece = Piece::new(0, 32768, [0; 20]);
        let layout: Vec<(u32, u32)> = piece.blocks().iter().map(|b| (b.offset, b.length)).collect();

        assert_eq!(layout, vec![(0, 16384), (16384, 16384)]);
        assert!(piece
            .blocks()
            .iter()
            .all(|b| b.status == BlockStatus::Missing && b.piece == 0));
    }

    #[test]
    fn last_block_is_shorter() {
        let piece = Piece::new(3, 20000, [0; 20]);
        let layout: Vec<(u32, u32)> = piece.blocks().iter().map(|b| (b.offset, b.length)).collect();

        assert_eq!(layout, vec![(0, 16384), (16384, 3616)]);
    }

    #[test]
    fn blocks_cover_the_piece() {
        for length in [1, 16383, 16384, 16385, 100_000, 262_144] {
            let piece = Piece::new(0, length, [0; 20]);
            let mut expected_offset = 0;
            for block in piece.blocks() {
                assert_eq!(block.offset, expected_offset);
                assert!(block.length > 0 && block.length <= BLOCK_SIZE);
                expected_offset += block.length;
            }
            assert_eq!(expected_offset, length);
        }
    }

    #[test]
    fn missing_blocks_are_handed_out_in_order() {
        let mut piece = Piece::new(0, 40000, [0; 20]);

        assert_eq!(piece.first_missing_block().unwrap().offset, 0);
        assert_eq!(piece.first_missing_block().unwrap().offset, 16384);
        assert_eq!(piece.blocks()[0].status, BlockStatus::Pending);
        assert_eq!(piece.blocks()[1].status, BlockStatus::Pending);

        let last = piece.first_missing_block().unwrap();
        assert_eq!((last.offset, last.length), (32768, 7232));

        // Pending blocks are not missing, yet the piece is not complete
        assert!(matches!(piece.first_missing_block(), Err(Error::State(_))));
        assert!(!piece.all_blocks_retrieved());
    }

    #[test]
    fn completion_and_hash() {
        let data: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        let mut piece = Piece::new(1, 20000, sha1(&data));

        assert!(!piece.all_blocks_retrieved());
        fill(&mut piece, &data);

        assert!(piece.all_blocks_retrieved());
        assert_eq!(piece.assembled_data().len(), 20000);
        assert_eq!(piece.assembled_data(), data);
        assert!(piece.hash_matches());
        assert!(matches!(piece.first_missing_block(), Err(Error::State(_))));
    }

    #[test]
    fn corrupted_data_does_not_match() {
        let data = vec![7u8; 16384];
        let mut piece = Piece::new(0, 16384, sha1(&data));

        piece.first_missing_block().unwrap();
        piece.save_block(0, vec![8u8; 16384]).unwrap();

        assert!(piece.all_blocks_retrieved());
        assert!(!piece.hash_matches());
    }

    #[test]
    fn wrong_block_length_is_rejected() {
        let mut piece = Piece::new(0, 20000, [0; 20]);
        piece.first_missing_block().unwrap();

        let err = piece.save_block(0, vec![0; 100]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(piece.blocks()[0].status, BlockStatus::Pending);
        assert!(piece.blocks()[0].data.is_none());

        let err = piece.save_block(16384, vec![0; 16384]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(piece.blocks()[1].status, BlockStatus::Missing);
    }

    #[test]
    fn unknown_offset_is_rejected() {
        let mut piece = Piece::new(0, 32768, [0; 20]);
        let err = piece.save_block(100, vec![0; 16384]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn duplicate_blocks_overwrite() {
        let mut piece = Piece::new(0, 16384, [0; 20]);
        piece.save_block(0, vec![1; 16384]).unwrap();
        piece.save_block(0, vec![2; 16384]).unwrap();

        assert!(piece.all_blocks_retrieved());
        assert_eq!(piece.assembled_data(), vec![2; 16384]);
    }

    #[test]
    fn reset_forgets_everything() {
        let data = vec![5u8; 32768];
        let mut piece = Piece::new(0, 32768, sha1(&data));
        fill(&mut piece, &data);

        piece.reset();

        assert!(!piece.all_blocks_retrieved());
        assert!(piece.assembled_data().is_empty());
        assert!(piece
            .blocks()
            .iter()
            .all(|b| b.status == BlockStatus::Missing && b.data.is_none()));
        assert_eq!(piece.first_missing_block().unwrap().offset, 0);
    }
}
