//! Error types for repository operations.

use stowage_reduce::ReduceError;
use stowage_storage::StorageError;
use thiserror::Error;

/// Result type alias for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Every failure a repository operation can surface.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Impossible parameters, e.g. a failure tolerance not below the backend count.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A snapshot, volume, archive or chunk does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up ("snapshot", "volume", ...)
        kind: &'static str,
        /// The id or path that matched nothing
        id: String,
    },

    /// An id prefix matched more than one object.
    #[error("{kind} id prefix {prefix:?} is ambiguous")]
    Ambiguous {
        /// What was looked up
        kind: &'static str,
        /// The prefix given
        prefix: String,
    },

    /// Wrong password, or metadata that fails to decrypt.
    #[error("Authentication failed: wrong password or undecryptable data")]
    Authentication,

    /// Reconstructed data does not match its content hash.
    #[error("Corruption detected in chunk {hash}")]
    Corruption {
        /// Hex hash of the damaged chunk
        hash: String,
    },

    /// Fewer than M−F pieces could be written or read.
    #[error("Redundancy error: need {needed} pieces, only {available} available")]
    Redundancy {
        /// Pieces required
        needed: usize,
        /// Pieces that were reachable
        available: usize,
    },

    /// Transport failure on a backend.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The operation was cancelled cooperatively.
    #[error("Operation cancelled")]
    Cancelled,

    /// A read started at or past the end of the archive.
    #[error("End of archive")]
    EndOfArchive,

    /// Metadata could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A background task panicked or was aborted.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Chunk codec failure that is neither authentication nor configuration.
    #[error("Reduction error: {0}")]
    Reduce(ReduceError),

    /// Local I/O error on a source file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    /// Shorthand for [`RepoError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RepoError::NotFound { kind, id: id.into() }
    }

    /// True for the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RepoError::Cancelled)
    }
}

impl From<StorageError> for RepoError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { key } => RepoError::NotFound { kind: "object", id: key },
            StorageError::Redundancy { needed, available } => RepoError::Redundancy { needed, available },
            StorageError::Configuration(msg) => RepoError::Configuration(msg),
            StorageError::UnsupportedScheme(scheme) => {
                RepoError::Configuration(format!("unsupported backend scheme {scheme:?}"))
            }
            StorageError::InvalidUrl(url) => RepoError::Configuration(format!("invalid backend URL {url:?}")),
            other => RepoError::Backend(other.to_string()),
        }
    }
}

impl From<ReduceError> for RepoError {
    fn from(err: ReduceError) -> Self {
        match err {
            ReduceError::DecryptionAuthFailed => RepoError::Authentication,
            ReduceError::UnsupportedAlgorithm(_)
            | ReduceError::InvalidChunkerConfig(_)
            | ReduceError::MissingKey => RepoError::Configuration(err.to_string()),
            other => RepoError::Reduce(other),
        }
    }
}

impl From<bincode::Error> for RepoError {
    fn from(err: bincode::Error) -> Self {
        RepoError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        RepoError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RepoError {
    fn from(err: tokio::task::JoinError) -> Self {
        RepoError::TaskFailed(err.to_string())
    }
}
