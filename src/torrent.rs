//! # BitTorrent Torrent Metadata
//!
//! This module loads single-file torrent descriptors.
//!
//! ## Torrent File Format
//!
//! Torrent files contain metadata in bencoded format:
//!
//! - **announce**: Tracker URL for peer discovery
//! - **announce-list**: Optional tiers of additional tracker URLs
//! - **info**: Dictionary with file information and piece hashes
//!   - **pieces**: Concatenated SHA-1 hashes for integrity verification
//!   - **piece length**: Size of each piece (typically 256KB-1MB)
//!   - **length**: Total file size
//!   - **name**: Suggested filename
//!
//! The info hash identifying the swarm is the SHA-1 of the bencoded `info`
//! dictionary exactly as found in the file, unknown keys included.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_bencode::de;
use serde_bencode::ser;
use serde_bencode::value::Value;
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

use std::fs;
use std::path::Path;

// Size of SHA-1 hash in bytes
const SHA1_HASH_SIZE: usize = 20;

/// Metadata of a single-file torrent.
#[derive(Debug, Default, Clone)]
pub struct TorrentFile {
    /// Tracker URLs, `announce` first, without duplicates
    pub announce_list: Vec<String>,
    /// Free-form comment
    pub comment: String,
    /// 20-byte SHA-1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
    /// One 20-byte SHA-1 hash per piece
    pub piece_hashes: Vec<[u8; 20]>,
    /// Size of each piece in bytes (except possibly the last)
    pub piece_length: u32,
    /// Total size of the file in bytes
    pub length: u64,
    /// Suggested filename
    pub name: String,
}

/// BencodeInfo structure.
#[derive(Deserialize)]
struct BencodeInfo {
    // Concatenation of all pieces 20-byte SHA-1 hashes
    pieces: ByteBuf,
    // Size of each piece in bytes
    #[serde(rename = "piece length")]
    piece_length: u32,
    // Size of the file in bytes, absent for multi-file torrents
    #[serde(default)]
    length: Option<u64>,
    // Suggested filename where to save the file
    name: String,
}

/// BencodeTorrent structure.
#[derive(Deserialize)]
struct BencodeTorrent {
    // URL of the tracker
    #[serde(default)]
    announce: String,
    // Tiers of tracker URLs
    #[serde(rename = "announce-list", default)]
    announce_list: Vec<Vec<String>>,
    #[serde(default)]
    comment: String,
    // Informations about file
    info: BencodeInfo,
}

/// Torrent with the info dictionary kept undecoded, for hashing.
#[derive(Deserialize)]
struct RawTorrent {
    info: Value,
}

impl BencodeInfo {
    /// Split bencoded pieces into SHA-1 hashes.
    fn split_pieces_hashes(&self) -> Result<Vec<[u8; 20]>> {
        if self.pieces.len() % SHA1_HASH_SIZE != 0 {
            return Err(anyhow!("torrent pieces field is not a list of SHA-1 hashes"));
        }

        Ok(self
            .pieces
            .chunks_exact(SHA1_HASH_SIZE)
            .map(|chunk| {
                let mut hash = [0u8; SHA1_HASH_SIZE];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }
}

impl TorrentFile {
    /// Open and decode the torrent at `path`.
    pub fn open(path: &Path) -> Result<TorrentFile> {
        let buf = fs::read(path).with_context(|| format!("could not read torrent {:?}", path))?;
        TorrentFile::from_bytes(&buf)
    }

    /// Decode a bencoded torrent.
    pub fn from_bytes(buf: &[u8]) -> Result<TorrentFile> {
        let bencode = de::from_bytes::<BencodeTorrent>(buf).context("could not decode torrent")?;
        let raw = de::from_bytes::<RawTorrent>(buf).context("could not decode torrent")?;

        let length = bencode
            .info
            .length
            .ok_or_else(|| anyhow!("multi-file torrents are not supported"))?;
        if bencode.info.piece_length == 0 {
            return Err(anyhow!("torrent has a zero piece length"));
        }

        // Hash the info dictionary as it was encoded in the file
        let info = ser::to_bytes(&raw.info).context("could not encode info dictionary")?;
        let info_hash: [u8; 20] = Sha1::digest(&info).into();

        let mut announce_list: Vec<String> = vec![];
        let tiers = bencode.announce_list.iter().flatten();
        for url in std::iter::once(&bencode.announce).chain(tiers) {
            if !url.is_empty() && !announce_list.contains(url) {
                announce_list.push(url.clone());
            }
        }
        if announce_list.is_empty() {
            return Err(anyhow!("torrent has no announce or announce-list"));
        }

        let torrent = TorrentFile {
            announce_list,
            comment: bencode.comment,
            info_hash,
            piece_hashes: bencode.info.split_pieces_hashes()?,
            piece_length: bencode.info.piece_length,
            length,
            name: bencode.info.name,
        };

        let expected = torrent.length.div_ceil(torrent.piece_length as u64);
        if torrent.piece_count() as u64 != expected {
            return Err(anyhow!(
                "torrent has {} piece hashes for {} pieces",
                torrent.piece_count(),
                expected
            ));
        }

        Ok(torrent)
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Length of piece `index`; only the last piece may be shorter.
    pub fn piece_len(&self, index: u32) -> u32 {
        let begin = self.piece_offset(index);
        let end = (begin + self.piece_length as u64).min(self.length);
        end.saturating_sub(begin) as u32
    }

    /// Byte offset of piece `index` within the file.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn bytes(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    fn dict(entries: Vec<(&str, Value)>) -> Value {
        let map: HashMap<Vec<u8>, Value> = entries
            .into_iter()
            .map(|(key, value)| (key.as_bytes().to_vec(), value))
            .collect();
        Value::Dict(map)
    }

    fn info(pieces: usize, piece_length: i64, length: i64) -> Value {
        dict(vec![
            ("length", Value::Int(length)),
            ("name", bytes("debian.iso")),
            ("piece length", Value::Int(piece_length)),
            ("pieces", Value::Bytes(vec![0x11; 20 * pieces])),
            ("private", Value::Int(1)),
        ])
    }

    fn encode(root: Value) -> Vec<u8> {
        ser::to_bytes(&root).unwrap()
    }

    #[test]
    fn decodes_single_file_torrent() {
        let buf = encode(dict(vec![
            ("announce", bytes("http://tracker.example/announce")),
            (
                "announce-list",
                Value::List(vec![
                    Value::List(vec![bytes("http://tracker.example/announce")]),
                    Value::List(vec![bytes("http://backup.example/announce")]),
                ]),
            ),
            ("comment", bytes("test")),
            ("info", info(2, 16384, 20000)),
        ]));

        let torrent = TorrentFile::from_bytes(&buf).unwrap();

        assert_eq!(
            torrent.announce_list,
            vec![
                "http://tracker.example/announce".to_string(),
                "http://backup.example/announce".to_string()
            ]
        );
        assert_eq!(torrent.comment, "test");
        assert_eq!(torrent.name, "debian.iso");
        assert_eq!(torrent.piece_length, 16384);
        assert_eq!(torrent.length, 20000);
        assert_eq!(torrent.piece_hashes, vec![[0x11; 20]; 2]);
        assert_eq!(torrent.piece_len(0), 16384);
        assert_eq!(torrent.piece_len(1), 3616);
        assert_eq!(torrent.piece_offset(1), 16384);
    }

    #[test]
    fn info_hash_covers_unknown_keys() {
        let buf = encode(dict(vec![
            ("announce", bytes("http://tracker.example/announce")),
            ("info", info(2, 16384, 20000)),
        ]));
        let torrent = TorrentFile::from_bytes(&buf).unwrap();

        let expected: [u8; 20] = Sha1::digest(encode(info(2, 16384, 20000))).into();
        assert_eq!(torrent.info_hash, expected);
    }

    #[test]
    fn rejects_malformed_torrents() {
        let no_tracker = encode(dict(vec![("info", info(2, 16384, 20000))]));
        assert!(TorrentFile::from_bytes(&no_tracker).is_err());

        let wrong_count = encode(dict(vec![
            ("announce", bytes("http://tracker.example/announce")),
            ("info", info(3, 16384, 20000)),
        ]));
        assert!(TorrentFile::from_bytes(&wrong_count).is_err());

        let multi_file = encode(dict(vec![
            ("announce", bytes("http://tracker.example/announce")),
            (
                "info",
                dict(vec![
                    ("files", Value::List(vec![])),
                    ("name", bytes("dir")),
                    ("piece length", Value::Int(16384)),
                    ("pieces", Value::Bytes(vec![])),
                ]),
            ),
        ]));
        assert!(TorrentFile::from_bytes(&multi_file).is_err());

        assert!(TorrentFile::from_bytes(b"not bencode").is_err());
    }
}
