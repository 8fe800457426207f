//! # BitTorrent Peer Information
//!
//! Peers are discovered through the tracker, which answers with a compact
//! binary list of 6-byte entries:
//!
//! ```text
//! <IP: 4 bytes><Port: 2 bytes>
//! ```
//!
//! Both fields are in network byte order (big-endian).

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ByteOrder};

use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

const PEER_SIZE: usize = 6;

type PeerId = u32;

/// A peer of the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    /// Sequential identifier used in logs
    pub id: PeerId,
    /// Address to connect to
    pub addr: SocketAddr,
}

impl Peer {
    pub fn new(id: PeerId, addr: SocketAddr) -> Peer {
        Peer { id, addr }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.id, self.addr)
    }
}

/// Parse a compact peer list, dropping duplicate addresses.
///
/// Peers are numbered in order of appearance, starting at `first_id`.
pub fn parse_compact_peers(tracker_peers: &[u8], first_id: PeerId) -> Result<Vec<Peer>> {
    if tracker_peers.len() % PEER_SIZE != 0 {
        return Err(anyhow!("received invalid peers from tracker"));
    }

    let mut seen = HashSet::new();
    let mut peers = vec![];

    for entry in tracker_peers.chunks_exact(PEER_SIZE) {
        let ip = Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);
        let port = BigEndian::read_u16(&entry[4..]);
        let addr = SocketAddr::V4(SocketAddrV4::new(ip, port));

        if seen.insert(addr) {
            peers.push(Peer::new(first_id + peers.len() as PeerId, addr));
        }
    }

    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_entries() {
        let data = [192, 168, 1, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0, 80];
        let peers = parse_compact_peers(&data, 0).unwrap();

        assert_eq!(
            peers,
            vec![
                Peer::new(0, "192.168.1.1:6881".parse().unwrap()),
                Peer::new(1, "10.0.0.2:80".parse().unwrap()),
            ]
        );
        assert_eq!(peers[1].to_string(), "#1 (10.0.0.2:80)");
    }

    #[test]
    fn drops_duplicates() {
        let data = [1, 2, 3, 4, 0, 1, 1, 2, 3, 4, 0, 1, 5, 6, 7, 8, 0, 2];
        let peers = parse_compact_peers(&data, 10).unwrap();

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].id, 10);
        assert_eq!(peers[1].id, 11);
        assert_eq!(peers[1].addr, "5.6.7.8:2".parse().unwrap());
    }

    #[test]
    fn rejects_truncated_lists() {
        assert!(parse_compact_peers(&[1, 2, 3, 4, 5], 0).is_err());
        assert!(parse_compact_peers(&[], 0).unwrap().is_empty());
    }
}
