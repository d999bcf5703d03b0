#![warn(missing_docs)]

//! Stowage reduction subsystem: content-defined chunking (FastCDC), BLAKE3 fingerprints,
//! compression (Deflate family/Zstd/LZ4), encryption (AES-GCM/ChaCha20-Poly1305)
//!
//! Write path: Data → Chunk (FastCDC) → Fingerprint (BLAKE3) → Compress → Encrypt
//! Read path:  Decrypt → Decompress → Data

pub mod chunker;
pub mod compression;
pub mod encryption;
pub mod error;
pub mod fingerprint;
pub mod key;
pub mod pipeline;

pub use chunker::{Chunk, ChunkStream, Chunker, ChunkerConfig};
pub use compression::CompressionAlgorithm;
pub use encryption::{EncryptedChunk, EncryptionAlgorithm, EncryptionKey};
pub use error::ReduceError;
pub use fingerprint::{blake3_hash, ChunkHash};
pub use key::{unwrap_master_key, wrap_master_key, KdfCost, KdfParams, WrappedKey};
pub use pipeline::{Codec, EncodedChunk, ReductionPipeline};
