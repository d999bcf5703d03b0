#![warn(missing_docs)]

//! Stowage storage subsystem: backend capabilities and redundant piece placement
//!
//! A chunk is encoded into M pieces (Reed–Solomon, or striping when F = 0),
//! piece `i` is written to backend `i`, and any M−F pieces rebuild it.

pub mod backend;
pub mod error;
pub mod local_backend;
pub mod manager;
pub mod mem_backend;
pub mod redundancy;

pub use backend::{Backend, BackendRegistry, BackendUrl};
pub use error::{StorageError, StorageResult};
pub use local_backend::LocalBackend;
pub use manager::{piece_key, BackendInfo, BackendManager, PieceLocation, StoredChunk};
pub use mem_backend::{MemoryBackend, MemoryBackendStats};
pub use redundancy::RedundancyLayout;
