//! Error types for the storage subsystem.

use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key does not exist on the backend.
    #[error("Key not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// A transport-level failure on one backend.
    #[error("Backend error on {location}: {reason}")]
    Backend {
        /// Location of the failing backend.
        location: String,
        /// Description of the error.
        reason: String,
    },

    /// The backend is offline or refused the request.
    #[error("Backend unavailable: {location}")]
    Unavailable {
        /// Location of the unreachable backend.
        location: String,
    },

    /// No backend implementation is registered for this URL scheme.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The URL could not be parsed.
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    /// Redundancy parameters are impossible for the backend set.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Too few pieces were written or retrieved to satisfy the redundancy contract.
    #[error("Redundancy error: need {needed} pieces, only {available} available")]
    Redundancy {
        /// Pieces required.
        needed: usize,
        /// Pieces confirmed.
        available: usize,
    },

    /// The erasure coder rejected its input.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Shorthand for a [`StorageError::Backend`].
    pub fn backend(location: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        StorageError::Backend {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}
