//! Per-chunk codec: compress → encrypt on the write path, decrypt → decompress on read

use crate::{
    compression::{compress, decompress, is_compressible, CompressionAlgorithm},
    encryption::{decrypt, derive_chunk_key, encrypt, EncryptedChunk, EncryptionAlgorithm, EncryptionKey},
    error::ReduceError,
    fingerprint::ChunkHash,
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

/// The algorithms a chunk was actually encoded with. Recorded next to every
/// chunk reference so later scheme changes never break older chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Codec {
    /// Compression applied before encryption
    pub compression: CompressionAlgorithm,
    /// Encryption applied last
    pub encryption: EncryptionAlgorithm,
}

/// A chunk after the write-path transforms, ready for redundancy encoding
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Serialized ciphertext (nonce prefix included when encrypted)
    pub payload: Vec<u8>,
    /// Algorithms used; compression falls back to `None` for incompressible data
    pub codec: Codec,
    /// Plaintext length
    pub plain_size: u64,
}

/// Stateless chunk codec bound to a repository master key
#[derive(Debug, Clone)]
pub struct ReductionPipeline {
    master_key: Option<EncryptionKey>,
}

impl ReductionPipeline {
    /// Codec that can only handle `EncryptionAlgorithm::None`
    pub fn new() -> Self {
        Self { master_key: None }
    }

    /// Codec with the repository master key; per-chunk keys are derived from it
    pub fn with_master_key(master_key: EncryptionKey) -> Self {
        Self {
            master_key: Some(master_key),
        }
    }

    fn chunk_key(&self, hash: &ChunkHash) -> Result<EncryptionKey, ReduceError> {
        let master = self.master_key.as_ref().ok_or(ReduceError::MissingKey)?;
        Ok(derive_chunk_key(master, hash.as_bytes()))
    }

    /// `encrypt(compress(plaintext))`
    #[instrument(skip(self, plaintext), fields(hash = %hash.short(), len = plaintext.len()))]
    pub fn encode(
        &self,
        plaintext: &[u8],
        hash: &ChunkHash,
        compression: CompressionAlgorithm,
        encryption: EncryptionAlgorithm,
    ) -> Result<EncodedChunk, ReduceError> {
        let (compressed, compression) =
            if compression != CompressionAlgorithm::None && is_compressible(plaintext) {
                (compress(plaintext, compression)?, compression)
            } else {
                (plaintext.to_vec(), CompressionAlgorithm::None)
            };

        let payload = match encryption {
            EncryptionAlgorithm::None => compressed,
            algo => encrypt(&compressed, &self.chunk_key(hash)?, algo)?.to_bytes(),
        };
        trace!(compressed = %compression, encoded = payload.len(), "chunk encoded");

        Ok(EncodedChunk {
            payload,
            codec: Codec {
                compression,
                encryption,
            },
            plain_size: plaintext.len() as u64,
        })
    }

    /// `decompress(decrypt(payload))`
    pub fn decode(&self, payload: &[u8], hash: &ChunkHash, codec: Codec) -> Result<Vec<u8>, ReduceError> {
        let compressed = match codec.encryption {
            EncryptionAlgorithm::None => payload.to_vec(),
            algo => {
                let chunk = EncryptedChunk::from_bytes(payload, algo)?;
                decrypt(&chunk, &self.chunk_key(hash)?)?
            }
        };
        decompress(&compressed, codec.compression)
    }
}

impl Default for ReductionPipeline {
    fn default() -> Self {
        Self::new()
    }
}
