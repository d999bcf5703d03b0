//! Chunk compression: Deflate family (flate/gzip/zlib), LZMA, Zstd and LZ4

use crate::error::ReduceError;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;
use xz2::read::XzDecoder;
use xz2::stream::{LzmaOptions, Stream};
use xz2::write::XzEncoder;

/// Default Zstd level when the identifier carries none
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// liblzma preset used for LZMA streams
const LZMA_PRESET: u32 = 6;

/// Compression algorithm selection.
///
/// Persisted by identifier (`"zstd:3"`, `"gzip"`, ...), so a record naming an
/// algorithm this build doesn't know fails to load instead of being misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum CompressionAlgorithm {
    /// No compression (passthrough)
    #[default]
    None,
    /// Raw DEFLATE stream
    Flate,
    /// DEFLATE with gzip framing
    Gzip,
    /// DEFLATE with zlib framing
    Zlib,
    /// Legacy `.lzma` (LZMA_alone) stream
    Lzma,
    /// Zstandard
    Zstd {
        /// Compression level (1=fastest, 19=best ratio, 3=balanced default)
        level: i32,
    },
    /// LZ4 block format with prepended size
    Lz4,
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Flate => write!(f, "flate"),
            CompressionAlgorithm::Gzip => write!(f, "gzip"),
            CompressionAlgorithm::Zlib => write!(f, "zlib"),
            CompressionAlgorithm::Lzma => write!(f, "lzma"),
            CompressionAlgorithm::Zstd { level } => write!(f, "zstd:{}", level),
            CompressionAlgorithm::Lz4 => write!(f, "lz4"),
        }
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = ReduceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, level) = match s.split_once(':') {
            Some((name, level)) => (name, Some(level)),
            None => (s, None),
        };
        match (name.trim().to_ascii_lowercase().as_str(), level) {
            ("" | "none", None) => Ok(CompressionAlgorithm::None),
            ("flate", None) => Ok(CompressionAlgorithm::Flate),
            ("gzip", None) => Ok(CompressionAlgorithm::Gzip),
            ("zlib", None) => Ok(CompressionAlgorithm::Zlib),
            ("lzma", None) => Ok(CompressionAlgorithm::Lzma),
            ("lz4", None) => Ok(CompressionAlgorithm::Lz4),
            ("zstd", None) => Ok(CompressionAlgorithm::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }),
            ("zstd", Some(level)) => level
                .parse()
                .map(|level| CompressionAlgorithm::Zstd { level })
                .map_err(|_| ReduceError::UnsupportedAlgorithm(format!("zstd level {:?}", level))),
            _ => Err(ReduceError::UnsupportedAlgorithm(format!("compression {:?}", s))),
        }
    }
}

impl TryFrom<String> for CompressionAlgorithm {
    type Error = ReduceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CompressionAlgorithm> for String {
    fn from(algo: CompressionAlgorithm) -> Self {
        algo.to_string()
    }
}

fn write_all<W: Write>(mut encoder: W, data: &[u8]) -> Result<W, ReduceError> {
    encoder
        .write_all(data)
        .map_err(|e| ReduceError::CompressionFailed(e.to_string()))?;
    Ok(encoder)
}

fn read_all<R: Read>(mut decoder: R) -> Result<Vec<u8>, ReduceError> {
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ReduceError::DecompressionFailed(e.to_string()))?;
    Ok(out)
}

/// Compress data with the given algorithm. Returns compressed bytes.
pub fn compress(data: &[u8], algo: CompressionAlgorithm) -> Result<Vec<u8>, ReduceError> {
    let finish = |r: std::io::Result<Vec<u8>>| r.map_err(|e| ReduceError::CompressionFailed(e.to_string()));
    match algo {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Flate => {
            finish(write_all(DeflateEncoder::new(Vec::new(), Compression::default()), data)?.finish())
        }
        CompressionAlgorithm::Gzip => {
            finish(write_all(GzEncoder::new(Vec::new(), Compression::default()), data)?.finish())
        }
        CompressionAlgorithm::Zlib => {
            finish(write_all(ZlibEncoder::new(Vec::new(), Compression::default()), data)?.finish())
        }
        CompressionAlgorithm::Lzma => {
            let stream = LzmaOptions::new_preset(LZMA_PRESET)
                .and_then(|opts| Stream::new_lzma_encoder(&opts))
                .map_err(|e| ReduceError::CompressionFailed(e.to_string()))?;
            finish(write_all(XzEncoder::new_stream(Vec::new(), stream), data)?.finish())
        }
        CompressionAlgorithm::Zstd { level } => {
            zstd::encode_all(data, level).map_err(|e| ReduceError::CompressionFailed(e.to_string()))
        }
        CompressionAlgorithm::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
    }
}

/// Decompress data using the algorithm that was used for compression.
pub fn decompress(data: &[u8], algo: CompressionAlgorithm) -> Result<Vec<u8>, ReduceError> {
    match algo {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Flate => read_all(DeflateDecoder::new(data)),
        CompressionAlgorithm::Gzip => read_all(GzDecoder::new(data)),
        CompressionAlgorithm::Zlib => read_all(ZlibDecoder::new(data)),
        CompressionAlgorithm::Lzma => {
            let stream = Stream::new_lzma_decoder(u64::MAX)
                .map_err(|e| ReduceError::DecompressionFailed(e.to_string()))?;
            read_all(XzDecoder::new_stream(data, stream))
        }
        CompressionAlgorithm::Zstd { .. } => {
            zstd::decode_all(data).map_err(|e| ReduceError::DecompressionFailed(e.to_string()))
        }
        CompressionAlgorithm::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| ReduceError::DecompressionFailed(e.to_string())),
    }
}

/// Check whether compressing data is worthwhile.
/// Returns false if data appears to be already compressed or random (high entropy).
pub fn is_compressible(data: &[u8]) -> bool {
    if data.len() < 64 {
        return true;
    }
    let sample = &data[..data.len().min(1024)];
    let compressed = lz4_flex::compress_prepend_size(sample);
    (compressed.len() as f64) < (sample.len() as f64 * 0.95)
}
