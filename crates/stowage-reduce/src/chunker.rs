//! Content-defined chunking (FastCDC) over byte streams

use crate::error::ReduceError;
use crate::fingerprint::{blake3_hash, ChunkHash};
use bytes::Bytes;
use fastcdc::v2020::StreamCDC;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Smallest minimum chunk size FastCDC accepts.
pub const MIN_SIZE_LOWER_BOUND: usize = 64;
/// Largest minimum chunk size FastCDC accepts.
pub const MIN_SIZE_UPPER_BOUND: usize = 1_048_576;
/// Smallest average chunk size FastCDC accepts.
pub const AVG_SIZE_LOWER_BOUND: usize = 256;
/// Largest average chunk size FastCDC accepts.
pub const AVG_SIZE_UPPER_BOUND: usize = 4_194_304;
/// Smallest maximum chunk size FastCDC accepts.
pub const MAX_SIZE_LOWER_BOUND: usize = 1024;
/// Largest maximum chunk size FastCDC accepts.
pub const MAX_SIZE_UPPER_BOUND: usize = 16_777_216;

/// A content-defined chunk produced by the chunker
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk content
    pub data: Bytes,
    /// BLAKE3 hash of the chunk content (dedup key)
    pub hash: ChunkHash,
    /// Byte offset of this chunk in the original data stream
    pub offset: u64,
}

/// Configuration for the FastCDC chunker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Minimum chunk size in bytes
    pub min_size: usize,
    /// Average (target) chunk size in bytes
    pub avg_size: usize,
    /// Maximum chunk size in bytes
    pub max_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 32 * 1024,
            avg_size: 64 * 1024,
            max_size: 512 * 1024,
        }
    }
}

impl ChunkerConfig {
    /// Check the sizes against FastCDC's bounds and ordering.
    pub fn validate(&self) -> Result<(), ReduceError> {
        let check = |name: &str, value: usize, lo: usize, hi: usize| {
            if value < lo || value > hi {
                Err(ReduceError::InvalidChunkerConfig(format!(
                    "{} = {} is outside [{}, {}]",
                    name, value, lo, hi
                )))
            } else {
                Ok(())
            }
        };
        check("min_size", self.min_size, MIN_SIZE_LOWER_BOUND, MIN_SIZE_UPPER_BOUND)?;
        check("avg_size", self.avg_size, AVG_SIZE_LOWER_BOUND, AVG_SIZE_UPPER_BOUND)?;
        check("max_size", self.max_size, MAX_SIZE_LOWER_BOUND, MAX_SIZE_UPPER_BOUND)?;
        if !(self.min_size <= self.avg_size && self.avg_size <= self.max_size) {
            return Err(ReduceError::InvalidChunkerConfig(format!(
                "sizes must satisfy min <= avg <= max (got {}/{}/{})",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Content-defined chunker using the FastCDC algorithm
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker {
    /// Create a chunker with default sizes
    pub fn new() -> Self {
        Self {
            config: ChunkerConfig::default(),
        }
    }

    /// Create a chunker with custom configuration
    pub fn with_config(config: ChunkerConfig) -> Result<Self, ReduceError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The sizes this chunker cuts with
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazily chunk a reader. Each call starts a fresh sequence, so one
    /// chunker can be reused for every file of a backup.
    pub fn stream<R: Read>(&self, reader: R) -> ChunkStream<R> {
        ChunkStream {
            inner: StreamCDC::new(
                reader,
                self.config.min_size as u32,
                self.config.avg_size as u32,
                self.config.max_size as u32,
            ),
            emitted: false,
            done: false,
        }
    }

    /// Chunk an in-memory buffer.
    /// Concatenating all chunk.data bytes reconstructs the original data.
    pub fn chunk(&self, data: &[u8]) -> Result<Vec<Chunk>, ReduceError> {
        self.stream(data).collect()
    }
}

/// Iterator over the chunks of one stream.
///
/// An empty stream still yields exactly one (empty) chunk so every file has
/// at least one content reference.
pub struct ChunkStream<R: Read> {
    inner: StreamCDC<R>,
    emitted: bool,
    done: bool,
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = Result<Chunk, ReduceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(cut)) => {
                self.emitted = true;
                let data = Bytes::from(cut.data);
                let hash = blake3_hash(&data);
                Some(Ok(Chunk {
                    data,
                    hash,
                    offset: cut.offset,
                }))
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(ReduceError::Io(std::io::Error::other(e.to_string()))))
            }
            None => {
                self.done = true;
                if self.emitted {
                    None
                } else {
                    self.emitted = true;
                    Some(Ok(Chunk {
                        data: Bytes::new(),
                        hash: blake3_hash(&[]),
                        offset: 0,
                    }))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_chunker() -> Chunker {
        Chunker::with_config(ChunkerConfig {
            min_size: 1024,
            avg_size: 4096,
            max_size: 16 * 1024,
        })
        .unwrap()
    }

    fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    #[test]
    fn chunks_reassemble() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let chunks = Chunker::new().chunk(&data).unwrap();
        assert!(!chunks.is_empty());
        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
        assert_eq!(reassembled, data);
    }

    #[test]
    fn empty_data_single_chunk() {
        let chunks = Chunker::new().chunk(&[]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].data.is_empty());
        assert_eq!(chunks[0].hash, blake3_hash(&[]));
    }

    #[test]
    fn single_byte_single_chunk() {
        let chunks = Chunker::new().chunk(b"x").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0].data[..], b"x");
    }

    #[test]
    fn sizes_respect_bounds() {
        let chunker = small_chunker();
        let data = pseudo_random(300_000, 7);
        let chunks = chunker.chunk(&data).unwrap();
        let last = chunks.len() - 1;
        for (i, c) in chunks.iter().enumerate() {
            assert!(c.data.len() <= 16 * 1024);
            if i != last {
                assert!(c.data.len() >= 1024);
            }
        }
    }

    #[test]
    fn local_edit_preserves_most_chunks() {
        let chunker = small_chunker();
        let original = pseudo_random(200_000, 11);
        let mut edited = original.clone();
        edited[100_000] ^= 0xff;

        let a: Vec<ChunkHash> = chunker.chunk(&original).unwrap().iter().map(|c| c.hash).collect();
        let b: Vec<ChunkHash> = chunker.chunk(&edited).unwrap().iter().map(|c| c.hash).collect();
        let shared = b.iter().filter(|h| a.contains(h)).count();
        assert!(shared + 3 >= a.len(), "shared {} of {}", shared, a.len());
    }

    #[test]
    fn offsets_are_contiguous() {
        let data = pseudo_random(100_000, 3);
        let chunks = small_chunker().chunk(&data).unwrap();
        let mut expected = 0u64;
        for c in &chunks {
            assert_eq!(c.offset, expected);
            expected += c.data.len() as u64;
        }
        assert_eq!(expected, data.len() as u64);
    }

    #[test]
    fn invalid_config_rejected() {
        let bad = ChunkerConfig {
            min_size: 16,
            avg_size: 4096,
            max_size: 16 * 1024,
        };
        assert!(matches!(
            Chunker::with_config(bad),
            Err(ReduceError::InvalidChunkerConfig(_))
        ));
        let unordered = ChunkerConfig {
            min_size: 8192,
            avg_size: 4096,
            max_size: 16 * 1024,
        };
        assert!(unordered.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_chunks_reassemble(data in prop::collection::vec(0u8..=255, 0..200_000)) {
            let chunks = small_chunker().chunk(&data).unwrap();
            let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
            prop_assert_eq!(reassembled, data);
        }
    }
}
