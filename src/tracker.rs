//! # HTTP Tracker
//!
//! Announces the download to the trackers of a torrent and collects the peers
//! they return. Trackers are tried in order; the first one answering with a
//! usable peer list wins.
//!
//! Only compact responses are understood: `peers` is a string of 6-byte
//! entries, see [`crate::peer`].

use crate::config::PeerId;
use crate::peer::{parse_compact_peers, Peer};
use crate::torrent::TorrentFile;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_bencode::de;
use serde_bytes::ByteBuf;
use url::Url;

use std::time::Duration;

const TRACKER_TIMEOUT: Duration = Duration::from_secs(15);

/// BencodeTracker structure.
#[derive(Debug, Deserialize)]
struct BencodeTracker {
    // Human readable error, no other key is present when set
    #[serde(rename = "failure reason", default)]
    failure_reason: Option<String>,
    // Interval time to refresh the list of peers in seconds
    #[serde(default)]
    interval: Option<u64>,
    // Peers IP addresses
    #[serde(default)]
    peers: Option<ByteBuf>,
}

pub struct Tracker {
    client: reqwest::blocking::Client,
}

impl Tracker {
    pub fn new() -> Result<Tracker> {
        let client = reqwest::blocking::Client::builder()
            .timeout(TRACKER_TIMEOUT)
            .build()
            .context("could not build HTTP client")?;

        Ok(Tracker { client })
    }

    /// Ask the trackers of `torrent` for peers.
    ///
    /// # Arguments
    ///
    /// * `torrent` - Torrent being downloaded.
    /// * `peer_id` - 20-byte unique identifier of this client.
    /// * `port` - Port number announced to the tracker.
    ///
    pub fn fetch_peers(&self, torrent: &TorrentFile, peer_id: &PeerId, port: u16) -> Result<Vec<Peer>> {
        let mut last_error = anyhow!("torrent has no tracker");

        for announce in &torrent.announce_list {
            match self.announce(announce, torrent, peer_id, port) {
                Ok(peers) if peers.is_empty() => {
                    warn!("Tracker {} returned no peers", announce);
                    last_error = anyhow!("tracker {} returned no peers", announce);
                }
                Ok(peers) => {
                    info!("Tracker {} returned {} peers", announce, peers.len());
                    return Ok(peers);
                }
                Err(e) => {
                    warn!("Tracker {} failed: {:#}", announce, e);
                    last_error = e;
                }
            }
        }

        Err(last_error.context("could not get peers from any tracker"))
    }

    fn announce(
        &self,
        announce: &str,
        torrent: &TorrentFile,
        peer_id: &PeerId,
        port: u16,
    ) -> Result<Vec<Peer>> {
        let url = build_tracker_url(announce, &torrent.info_hash, peer_id, port, torrent.length)?;
        debug!("Announce to {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("could not reach tracker {}", announce))?;
        if !response.status().is_success() {
            return Err(anyhow!("tracker {} answered {}", announce, response.status()));
        }

        let body = response.bytes().context("could not read tracker response")?;
        parse_tracker_response(&body)
    }
}

/// Decode an announce response into its peers.
fn parse_tracker_response(body: &[u8]) -> Result<Vec<Peer>> {
    let response =
        de::from_bytes::<BencodeTracker>(body).context("could not decode tracker response")?;

    if let Some(reason) = response.failure_reason {
        return Err(anyhow!("tracker failure: {}", reason));
    }
    if let Some(interval) = response.interval {
        debug!("Tracker interval is {}s", interval);
    }

    let peers = response
        .peers
        .ok_or_else(|| anyhow!("tracker response has no peers"))?;
    parse_compact_peers(&peers, 0)
}

/// Build the announce URL for `announce`.
///
/// Binary values are percent-encoded byte by byte, since `url` would encode
/// them as UTF-8.
fn build_tracker_url(
    announce: &str,
    info_hash: &[u8; 20],
    peer_id: &PeerId,
    port: u16,
    left: u64,
) -> Result<String> {
    /// Each byte is encoded as %XX where XX is the hexadecimal representation
    fn percent_encode_binary(data: &[u8]) -> String {
        const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
        let mut encoded = String::with_capacity(data.len() * 3);

        for &byte in data {
            encoded.push('%');
            encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            encoded.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
        }

        encoded
    }

    let base_url =
        Url::parse(announce).with_context(|| format!("could not parse tracker url {}", announce))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(anyhow!("unsupported tracker scheme {}", base_url.scheme()));
    }

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
        percent_encode_binary(info_hash),
        percent_encode_binary(peer_id.as_bytes()),
        port,
        left
    );

    let mut url = base_url.to_string();
    if base_url.query().is_some() {
        url.push('&');
    } else {
        url.push('?');
    }
    url.push_str(&query);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_bencode::ser;
    use serde_bencode::value::Value;

    use std::collections::HashMap;

    fn response(entries: Vec<(&str, Value)>) -> Vec<u8> {
        let map: HashMap<Vec<u8>, Value> = entries
            .into_iter()
            .map(|(key, value)| (key.as_bytes().to_vec(), value))
            .collect();
        ser::to_bytes(&Value::Dict(map)).unwrap()
    }

    #[test]
    fn url_carries_binary_parameters() {
        let peer_id = PeerId(*b"-TN0100-abcdefghijkl");
        let mut info_hash = [0u8; 20];
        info_hash[0] = 0x12;
        info_hash[1] = 0xab;

        let url = build_tracker_url(
            "http://tracker.example:6969/announce",
            &info_hash,
            &peer_id,
            6881,
            20000,
        )
        .unwrap();

        assert!(url.starts_with("http://tracker.example:6969/announce?info_hash=%12%AB%00"));
        assert!(url.contains("&peer_id=%2D%54%4E%30%31%30%30%2D%61"));
        assert!(url.ends_with("&port=6881&uploaded=0&downloaded=0&left=20000&compact=1"));
    }

    #[test]
    fn url_keeps_existing_query() {
        let url = build_tracker_url(
            "https://tracker.example/announce?passkey=x",
            &[0; 20],
            &PeerId([b'a'; 20]),
            1,
            2,
        )
        .unwrap();

        assert!(url.starts_with("https://tracker.example/announce?passkey=x&info_hash="));
    }

    #[test]
    fn rejects_non_http_trackers() {
        let peer_id = PeerId([b'a'; 20]);
        assert!(build_tracker_url("udp://tracker.example:80", &[0; 20], &peer_id, 1, 2).is_err());
        assert!(build_tracker_url("not a url", &[0; 20], &peer_id, 1, 2).is_err());
    }

    #[test]
    fn decodes_compact_peers() {
        let body = response(vec![
            ("interval", Value::Int(1800)),
            (
                "peers",
                Value::Bytes(vec![127, 0, 0, 1, 0x1a, 0xe1, 127, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 1, 0, 80]),
            ),
        ]);

        let peers = parse_tracker_response(&body).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].addr, "127.0.0.1:6881".parse().unwrap());
        assert_eq!(peers[1].addr, "10.0.0.1:80".parse().unwrap());
        assert_eq!(peers[1].id, 1);
    }

    #[test]
    fn failure_reason_is_an_error() {
        let body = response(vec![("failure reason", Value::Bytes(b"unregistered torrent".to_vec()))]);

        let err = parse_tracker_response(&body).unwrap_err();
        assert!(err.to_string().contains("unregistered torrent"));
    }

    #[test]
    fn malformed_responses_are_errors() {
        assert!(parse_tracker_response(b"<html>").is_err());
        assert!(parse_tracker_response(&response(vec![("interval", Value::Int(60))])).is_err());
        assert!(parse_tracker_response(&response(vec![("peers", Value::Bytes(vec![1, 2, 3]))])).is_err());
    }
}
