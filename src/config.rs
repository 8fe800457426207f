//! # Download Configuration
//!
//! [`Config`] carries the tunables of a download (timeouts, retry budget,
//! announced port). [`Context`] bundles it with the identity of the download
//! (local peer id and info hash) and is shared read-only by the coordinator,
//! the workers and the peer sessions.

use rand::distributions::Alphanumeric;
use rand::Rng;

use std::fmt;
use std::time::Duration;

/// Prefix of locally generated peer ids (Azureus style).
const PEER_ID_PREFIX: &[u8; 8] = b"-TN0100-";

pub const DEFAULT_PORT: u16 = 6881;

/// 20-byte identifier announced to trackers and peers.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// Generate a fresh peer id: fixed client prefix, random alphanumeric tail.
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(PEER_ID_PREFIX);

        let mut rng = rand::thread_rng();
        for byte in id[8..].iter_mut() {
            *byte = rng.sample(Alphanumeric);
        }

        PeerId(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0))
    }
}

/// Tunables of a download.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deadline for establishing a TCP connection
    pub connect_timeout: Duration,
    /// Deadline for each receive operation
    pub read_timeout: Duration,
    /// Deadline for each send operation
    pub send_timeout: Duration,
    /// Attempts a worker makes at running its session
    pub max_attempts: u32,
    /// Port announced to the tracker
    pub port: u16,
    /// Interval between progress updates of the coordinator
    pub progress_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(1),
            max_attempts: 3,
            port: DEFAULT_PORT,
            progress_interval: Duration::from_millis(250),
        }
    }
}

/// Identity and configuration of one download.
#[derive(Debug, Clone)]
pub struct Context {
    /// Our peer id
    pub peer_id: PeerId,
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    pub info_hash: [u8; 20],
    pub config: Config,
}

impl Context {
    pub fn new(peer_id: PeerId, info_hash: [u8; 20], config: Config) -> Self {
        Context {
            peer_id,
            info_hash,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_peer_ids_carry_prefix() {
        let id = PeerId::generate();
        assert_eq!(&id.as_bytes()[..8], PEER_ID_PREFIX);
        assert!(id.as_bytes()[8..].iter().all(u8::is_ascii_alphanumeric));
    }

    #[test]
    fn generated_peer_ids_differ() {
        assert_ne!(PeerId::generate(), PeerId::generate());
    }

    #[test]
    fn default_timeouts() {
        let config = Config::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 3);
    }
}
