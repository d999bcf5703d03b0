//! Content fingerprinting: BLAKE3 hashing of chunk plaintext

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A 32-byte BLAKE3 hash identifying a chunk's plaintext. Used as the dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkHash(pub [u8; 32]);

impl ChunkHash {
    /// Return the hash as a lowercase hex string
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
    /// Return the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
    /// First eight hex digits, for log output
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ChunkHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(format!("expected 64 hex digits, got {}", s.len()));
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|e| format!("invalid hex at {}: {}", i * 2, e))?;
        }
        Ok(ChunkHash(out))
    }
}

/// Compute BLAKE3 hash of data
pub fn blake3_hash(data: &[u8]) -> ChunkHash {
    let hash = blake3::hash(data);
    ChunkHash(*hash.as_bytes())
}
