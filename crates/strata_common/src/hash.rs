//! Content hashing for cache entry identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 128-bit content hash identifying one pipeline binary cache entry.
///
/// Two binaries with the same `CacheId` are assumed to be identical; the
/// cache never defends against collisions. The id is computed with XXH3-128
/// over the compiled-input fingerprint and acts as the sole lookup key in
/// every cache layer and in the serialized blob format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheId([u8; 16]);

impl CacheId {
    /// Number of bytes in a `CacheId`.
    pub const LEN: usize = 16;

    /// Computes a cache id from a byte slice using XXH3-128.
    pub fn from_contents(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Builds a cache id from its raw little-endian byte representation.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parses a 32-digit hexadecimal string into a cache id.
    ///
    /// The string is interpreted most-significant byte first, matching
    /// [`CacheId`]'s `Display` output. Returns `None` on malformed input.
    pub fn parse_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = CacheId::from_contents(b"pipeline binary");
        let b = CacheId::from_contents(b"pipeline binary");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let a = CacheId::from_contents(b"vertex shader");
        let b = CacheId::from_contents(b"fragment shader");
        assert_ne!(a, b);
    }

    #[test]
    fn display_format() {
        let id = CacheId::from_contents(b"test");
        let s = format!("{id}");
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn parse_hex_roundtrip() {
        let id = CacheId::from_contents(b"roundtrip");
        let parsed = CacheId::parse_hex(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_hex_rejects_malformed() {
        assert!(CacheId::parse_hex("too short").is_none());
        assert!(CacheId::parse_hex(&"g".repeat(32)).is_none());
        assert!(CacheId::parse_hex(&"0".repeat(31)).is_none());
    }

    #[test]
    fn raw_bytes_roundtrip() {
        let id = CacheId::from_contents(b"bytes");
        let back = CacheId::from_bytes(*id.as_bytes());
        assert_eq!(id, back);
    }

    #[test]
    fn serde_roundtrip() {
        let id = CacheId::from_contents(b"serde");
        let json = serde_json::to_string(&id).unwrap();
        let back: CacheId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
