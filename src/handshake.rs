//! # BitTorrent Handshake Protocol
//!
//! The handshake is the first exchange on every peer connection. It confirms
//! both ends speak the BitTorrent protocol and are members of the same swarm.
//!
//! ## Message Format
//!
//! The handshake is a fixed 68-byte message:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte - Length of protocol string (19)
//! - **pstr**: 19 bytes - "BitTorrent protocol"
//! - **reserved**: 8 bytes - All zeros, no extension is negotiated
//! - **info_hash**: 20 bytes - SHA-1 hash of torrent info dictionary
//! - **peer_id**: 20 bytes - Unique identifier for the peer
//!
//! A response is accepted when its protocol string and info hash equal ours;
//! its reserved bytes and peer id are not checked.

use crate::error::{Error, Result};

pub const PROTOCOL_ID: &[u8; 19] = b"BitTorrent protocol";

/// Size of a handshake on the wire.
pub const HANDSHAKE_LEN: usize = 1 + PROTOCOL_ID.len() + 8 + 20 + 20;

const RESERVED_OFFSET: usize = 1 + PROTOCOL_ID.len();
const INFO_HASH_OFFSET: usize = RESERVED_OFFSET + 8;
const PEER_ID_OFFSET: usize = INFO_HASH_OFFSET + 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// 8 reserved bytes for protocol extensions
    pub reserved: [u8; 8],
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    pub info_hash: [u8; 20],
    /// 20-byte identifier of the sending peer
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Creates the handshake we send: standard protocol, no extension bits.
    pub fn new(peer_id: [u8; 20], info_hash: [u8; 20]) -> Self {
        Handshake {
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut serialized = Vec::with_capacity(HANDSHAKE_LEN);

        serialized.push(PROTOCOL_ID.len() as u8);
        serialized.extend_from_slice(PROTOCOL_ID);
        serialized.extend_from_slice(&self.reserved);
        serialized.extend_from_slice(&self.info_hash);
        serialized.extend_from_slice(&self.peer_id);

        serialized
    }

    /// Check that a peer's answer belongs to the same protocol and swarm.
    pub fn accepts(&self, response: &Handshake) -> bool {
        self.info_hash == response.info_hash
    }
}

/// Parse a 68-byte handshake received from a peer.
///
/// Fails unless the buffer carries the standard protocol string.
pub fn deserialize_handshake(buf: &[u8]) -> Result<Handshake> {
    if buf.len() != HANDSHAKE_LEN {
        return Err(Error::protocol(format!(
            "handshake of {} bytes, expected {}",
            buf.len(),
            HANDSHAKE_LEN
        )));
    }

    if buf[0] as usize != PROTOCOL_ID.len() || &buf[1..RESERVED_OFFSET] != PROTOCOL_ID {
        return Err(Error::protocol("peer does not speak the BitTorrent protocol"));
    }

    let mut handshake = Handshake::new([0; 20], [0; 20]);
    handshake
        .reserved
        .copy_from_slice(&buf[RESERVED_OFFSET..INFO_HASH_OFFSET]);
    handshake
        .info_hash
        .copy_from_slice(&buf[INFO_HASH_OFFSET..PEER_ID_OFFSET]);
    handshake.peer_id.copy_from_slice(&buf[PEER_ID_OFFSET..]);

    Ok(handshake)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_HASH: [u8; 20] = [0xab; 20];
    const PEER_ID: [u8; 20] = *b"-TN0100-abcdefghijkl";

    #[test]
    fn serialized_layout() {
        let bytes = Handshake::new(PEER_ID, INFO_HASH).serialize();

        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        assert_eq!(&bytes[20..28], &[0; 8]);
        assert_eq!(&bytes[28..48], &INFO_HASH);
        assert_eq!(&bytes[48..68], &PEER_ID);
    }

    #[test]
    fn response_is_parsed_and_accepted() {
        let ours = Handshake::new(PEER_ID, INFO_HASH);
        let mut theirs = Handshake::new(*b"-XX0001-000000000000", INFO_HASH);
        theirs.reserved[5] = 0x10;

        let parsed = deserialize_handshake(&theirs.serialize()).unwrap();
        assert_eq!(parsed, theirs);
        assert!(ours.accepts(&parsed));
    }

    #[test]
    fn foreign_swarm_is_refused() {
        let ours = Handshake::new(PEER_ID, INFO_HASH);
        let theirs = Handshake::new(PEER_ID, [0xcd; 20]);

        let parsed = deserialize_handshake(&theirs.serialize()).unwrap();
        assert!(!ours.accepts(&parsed));
    }

    #[test]
    fn foreign_protocol_is_refused() {
        let mut bytes = Handshake::new(PEER_ID, INFO_HASH).serialize();
        bytes[1] = b'b';
        assert!(matches!(deserialize_handshake(&bytes), Err(Error::Protocol(_))));

        let mut bytes = Handshake::new(PEER_ID, INFO_HASH).serialize();
        bytes[0] = 18;
        assert!(matches!(deserialize_handshake(&bytes), Err(Error::Protocol(_))));

        assert!(deserialize_handshake(&bytes[..40]).is_err());
    }
}
