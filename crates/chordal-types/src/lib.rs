use std::fmt;
use std::time::Duration;

/// A node's identity on the ring: its identifier and the address peers dial
/// to reach it. Cheap to clone; passed by value between tasks.
///
/// Two peers denote the same ring position iff their `id` bytes are equal;
/// the address is transport detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Ring identifier, `key_size / 8` bytes, big-endian, left-padded.
    pub id: Vec<u8>,
    /// Address the RPC transport dials, typically `host:port`.
    pub addr: String,
}

impl Peer {
    pub fn new(id: Vec<u8>, addr: impl Into<String>) -> Self {
        Peer { id, addr: addr.into() }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer(")?;
        for b in &self.id {
            write!(f, "{b:02x}")?;
        }
        write!(f, " @ {})", self.addr)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ChordError {
    #[error("key size must be a positive multiple of 8 bits, got {0}")]
    BadKeyLen(u32),
    #[error("ID length must be key size / 8 ({expected} bytes), got {actual}")]
    BadIdLen { expected: usize, actual: usize },
    #[error("invalid ID: {0}")]
    BadId(String),
    #[error("a node with this ID already exists in the ring")]
    IdCollision,
    #[error("key not found")]
    KeyNotFound,
    #[error("cannot modify an existing key")]
    KeyExists,
    #[error("node is not the accepted predecessor")]
    NotPredecessor,
    #[error("node has shut down")]
    NodeShutdown,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Node configuration. Built once from whatever layers the embedding
/// process assembles (defaults, file, environment), validated, and handed
/// to the node by value. There is no process-wide configuration state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of bits in the identifier space (the Chord `m`). Must be a
    /// positive multiple of 8.
    pub key_size: u32,
    /// Identifier width in bytes. Must equal `key_size / 8`.
    pub id_length: usize,
    /// How often each node runs the stabilize handshake with its successor.
    pub stabilize_interval: Duration,
    /// How often each node refreshes one finger-table entry.
    pub fix_finger_interval: Duration,
    /// Delay before the single retry inside `get`.
    pub retry_interval: Duration,
    /// Deadline for dialing a peer.
    pub connection_timeout: Duration,
}

impl Config {
    pub fn validate(&self) -> Result<(), ChordError> {
        // Identifiers are truncated SHA-1 hashes, so the space is capped at
        // the digest width.
        if self.key_size == 0 || self.key_size % 8 != 0 || self.key_size > 160 {
            return Err(ChordError::BadKeyLen(self.key_size));
        }
        let expected = (self.key_size / 8) as usize;
        if self.id_length != expected {
            return Err(ChordError::BadIdLen { expected, actual: self.id_length });
        }
        Ok(())
    }

    /// Configuration with the given key size and the interval defaults.
    pub fn with_key_size(key_size: u32) -> Self {
        Config {
            key_size,
            id_length: (key_size / 8) as usize,
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            key_size: 8,
            id_length: 1,
            stabilize_interval: Duration::from_millis(75),
            fix_finger_interval: Duration::from_millis(25),
            retry_interval: Duration::from_millis(150),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn key_size_must_be_multiple_of_8() {
        let cfg = Config { key_size: 12, id_length: 1, ..Config::default() };
        assert!(matches!(cfg.validate(), Err(ChordError::BadKeyLen(12))));

        let cfg = Config { key_size: 0, id_length: 0, ..Config::default() };
        assert!(matches!(cfg.validate(), Err(ChordError::BadKeyLen(0))));

        // Wider than the hash the identifiers are cut from.
        let cfg = Config { key_size: 168, id_length: 21, ..Config::default() };
        assert!(matches!(cfg.validate(), Err(ChordError::BadKeyLen(168))));
    }

    #[test]
    fn id_length_must_match_key_size() {
        let cfg = Config { key_size: 64, id_length: 4, ..Config::default() };
        assert!(matches!(
            cfg.validate(),
            Err(ChordError::BadIdLen { expected: 8, actual: 4 })
        ));
    }

    #[test]
    fn with_key_size_derives_id_length() {
        let cfg = Config::with_key_size(160);
        assert_eq!(cfg.id_length, 20);
        cfg.validate().unwrap();
    }

    #[test]
    fn peers_compare_by_value() {
        let a = Peer::new(vec![7], "127.0.0.1:4000");
        let b = Peer::new(vec![7], "127.0.0.1:4000");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "peer(07 @ 127.0.0.1:4000)");
    }
}
