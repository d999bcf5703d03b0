//! Error types for the stowage-reduce subsystem

/// All errors that can occur while chunking, compressing or encrypting data
#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    /// Compression operation failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    /// Decompression operation failed
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
    /// Encryption operation failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    /// Decryption authentication tag mismatch — wrong key, or data corrupted or tampered
    #[error("Decryption failed: authentication tag mismatch (wrong key or corrupted data)")]
    DecryptionAuthFailed,
    /// Encryption was requested but no key was provided
    #[error("Missing encryption key: encryption is enabled but no key was set")]
    MissingKey,
    /// Algorithm identifier is unknown or has no codec in this build
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Chunker sizes are outside the supported FastCDC bounds
    #[error("Invalid chunker configuration: {0}")]
    InvalidChunkerConfig(String),
    /// Password-based key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    /// I/O error while reading the chunked stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
