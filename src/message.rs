//! # BitTorrent Peer Wire Messages
//!
//! This module defines the message types and serialization for the BitTorrent
//! peer wire protocol. All communication between peers after the handshake uses
//! these messages.
//!
//! ## Message Structure
//!
//! Every message follows the same format:
//!
//! ```text
//! <length prefix><message ID><payload>
//! ```
//!
//! - **Length Prefix**: 4 bytes (big-endian u32) - Total length of message ID + payload
//! - **Message ID**: 1 byte - Identifies the message type
//! - **Payload**: Variable length - Message-specific data
//!
//! The transport consumes the length prefix, so [`deserialize_message`] works on
//! the remaining `<message ID><payload>` bytes.
//!
//! ## Message Types
//!
//! | ID | Name | Payload |
//! |----|------|---------|
//! | 0 | CHOKE | none |
//! | 1 | UNCHOKE | none |
//! | 2 | INTERESTED | none |
//! | 3 | NOT INTERESTED | none |
//! | 4 | HAVE | piece index |
//! | 5 | BITFIELD | bitfield bytes |
//! | 6 | REQUEST | index, begin, length |
//! | 7 | PIECE | index, begin, block data |
//! | 8 | CANCEL | index, begin, length |
//! | 9 | PORT | listen port |
//!
//! ## Keep-Alive Messages
//!
//! A keep-alive message has length 0 and no ID or payload.

use crate::error::{Error, Result};

use byteorder::{BigEndian, ReadBytesExt};

use std::fmt;
use std::io::Cursor;

/// Kind of a peer wire message.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
    Port = 9,
    /// Zero-length message, carries no ID on the wire
    KeepAlive,
}

impl TryFrom<u8> for MessageId {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        let id = match id {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            9 => MessageId::Port,
            _ => return Err(Error::protocol(format!("unknown message id {}", id))),
        };
        Ok(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageId::Choke => "CHOKE",
            MessageId::Unchoke => "UNCHOKE",
            MessageId::Interested => "INTERESTED",
            MessageId::NotInterested => "NOT_INTERESTED",
            MessageId::Have => "HAVE",
            MessageId::Bitfield => "BITFIELD",
            MessageId::Request => "REQUEST",
            MessageId::Piece => "PIECE",
            MessageId::Cancel => "CANCEL",
            MessageId::Port => "PORT",
            MessageId::KeepAlive => "KEEP_ALIVE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type identifier
    pub id: MessageId,
    /// Declared length: 1 + payload length, 0 for keep-alive
    pub length: u32,
    /// Message payload data
    pub payload: Vec<u8>,
}

/// Block carried by a PIECE message.
#[derive(Debug, PartialEq, Eq)]
pub struct BlockPayload<'a> {
    pub index: u32,
    pub begin: u32,
    pub data: &'a [u8],
}

impl Message {
    /// Build a new message without payload.
    pub fn new(id: MessageId) -> Self {
        Message::new_with_payload(id, vec![])
    }

    /// Build a new message with a payload.
    pub fn new_with_payload(id: MessageId, payload: Vec<u8>) -> Self {
        if id == MessageId::KeepAlive {
            return Message::keep_alive();
        }

        Message {
            id,
            length: 1 + payload.len() as u32,
            payload,
        }
    }

    pub fn keep_alive() -> Self {
        Message {
            id: MessageId::KeepAlive,
            length: 0,
            payload: vec![],
        }
    }

    /// Build a REQUEST for `length` bytes at `begin` within piece `index`.
    pub fn request(index: u32, begin: u32, length: u32) -> Self {
        let mut payload = Vec::with_capacity(12);
        for value in [index, begin, length] {
            payload.extend_from_slice(&value.to_be_bytes());
        }
        Message::new_with_payload(MessageId::Request, payload)
    }

    /// Build a HAVE announcing piece `index`.
    pub fn have(index: u32) -> Self {
        Message::new_with_payload(MessageId::Have, index.to_be_bytes().to_vec())
    }

    /// Serialize message, length prefix included.
    pub fn serialize(&self) -> Vec<u8> {
        if self.id == MessageId::KeepAlive {
            return vec![0; 4];
        }

        let mut serialized: Vec<u8> = Vec::with_capacity(5 + self.payload.len());
        serialized.extend_from_slice(&self.length.to_be_bytes());
        serialized.push(self.id as u8);
        serialized.extend_from_slice(&self.payload);

        serialized
    }

    /// Piece index of a HAVE message.
    pub fn parse_have(&self) -> Result<u32> {
        if self.id != MessageId::Have || self.payload.len() != 4 {
            return Err(Error::protocol("received invalid HAVE from peer"));
        }

        let mut cursor = Cursor::new(&self.payload);
        Ok(cursor.read_u32::<BigEndian>()?)
    }

    /// Index, offset and data of a PIECE message.
    pub fn parse_piece(&self) -> Result<BlockPayload<'_>> {
        if self.id != MessageId::Piece || self.payload.len() < 8 {
            return Err(Error::protocol("received invalid PIECE from peer"));
        }

        let mut cursor = Cursor::new(&self.payload[..8]);
        let index = cursor.read_u32::<BigEndian>()?;
        let begin = cursor.read_u32::<BigEndian>()?;

        Ok(BlockPayload {
            index,
            begin,
            data: &self.payload[8..],
        })
    }
}

/// Deserialize a message whose length prefix was already consumed.
///
/// Empty input is a keep-alive.
pub fn deserialize_message(message_buf: &[u8]) -> Result<Message> {
    let Some((&id, payload)) = message_buf.split_first() else {
        return Ok(Message::keep_alive());
    };

    Ok(Message {
        id: MessageId::try_from(id)?,
        length: message_buf.len() as u32,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_IDS: [MessageId; 10] = [
        MessageId::Choke,
        MessageId::Unchoke,
        MessageId::Interested,
        MessageId::NotInterested,
        MessageId::Have,
        MessageId::Bitfield,
        MessageId::Request,
        MessageId::Piece,
        MessageId::Cancel,
        MessageId::Port,
    ];

    #[test]
    fn serialized_messages_parse_back() {
        for (tag, id) in ALL_IDS.into_iter().enumerate() {
            let message = Message::new_with_payload(id, vec![tag as u8; tag]);
            let serialized = message.serialize();

            assert_eq!(serialized[4], tag as u8);
            let parsed = deserialize_message(&serialized[4..]).unwrap();
            assert_eq!(parsed, message);
        }
    }

    #[test]
    fn length_prefix_counts_id_and_payload() {
        let serialized = Message::request(1, 16384, 16384).serialize();
        assert_eq!(&serialized[..4], &[0, 0, 0, 13]);
        assert_eq!(serialized.len(), 17);
        assert_eq!(
            &serialized[4..],
            &[6, 0, 0, 0, 1, 0, 0, 64, 0, 0, 0, 64, 0]
        );
    }

    #[test]
    fn keep_alive_is_an_empty_frame() {
        let parsed = deserialize_message(&[]).unwrap();
        assert_eq!(parsed.id, MessageId::KeepAlive);
        assert_eq!(parsed.length, 0);
        assert!(parsed.payload.is_empty());

        assert_eq!(Message::keep_alive().serialize(), vec![0, 0, 0, 0]);
        assert_eq!(Message::new(MessageId::KeepAlive).serialize(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn unknown_ids_are_protocol_errors() {
        for id in [10u8, 20, 255] {
            let err = deserialize_message(&[id, 1, 2]).unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "id {}", id);
        }
    }

    #[test]
    fn have_payload() {
        assert_eq!(Message::have(258).parse_have().unwrap(), 258);

        let short = Message::new_with_payload(MessageId::Have, vec![0, 1]);
        assert!(matches!(short.parse_have(), Err(Error::Protocol(_))));
    }

    #[test]
    fn piece_payload() {
        let message =
            Message::new_with_payload(MessageId::Piece, vec![0, 0, 0, 2, 0, 0, 64, 0, 0xaa, 0xbb]);
        let block = message.parse_piece().unwrap();
        assert_eq!(block.index, 2);
        assert_eq!(block.begin, 16384);
        assert_eq!(block.data, &[0xaa, 0xbb]);

        let truncated = Message::new_with_payload(MessageId::Piece, vec![0, 0, 0, 2]);
        assert!(matches!(truncated.parse_piece(), Err(Error::Protocol(_))));
    }
}
