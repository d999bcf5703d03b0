#![warn(missing_docs)]

//! Stowage repository subsystem: the dedup chunk index with reference
//! counting and pack, the repository/volume/snapshot/archive model, add and
//! clone, full and random-access reconstruction, and sampling verify.
//!
//! Add path:  walk → chunk → index check → encode → redundant write → archive
//! Read path: archive → chunk refs → piece fetch → rebuild → decode → bytes

pub mod archive;
pub mod config;
pub mod error;
pub mod index;
pub mod pack;
pub mod progress;
pub mod reader;
pub mod repository;
pub mod sealed;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod verify;
pub mod volume;

pub use archive::{Archive, ArchiveType, ChunkRef};
pub use config::{EngineConfig, StoreOptions, VerifyOptions};
pub use error::{RepoError, RepoResult};
pub use index::{ChunkDescriptor, ChunkIndex};
pub use pack::{pack, spawn_pack, PackEvent, PackReport};
pub use progress::{Progress, TaskHandle};
pub use reader::ArchiveReader;
pub use repository::{Repository, RepositoryMeta};
pub use snapshot::Snapshot;
pub use stats::{format_size, Stats};
pub use store::{add, StoreContext, StoreEvent};
pub use telemetry::init_tracing;
pub use verify::{FailureKind, VerifyEvent, VerifyReport, VerifyScope};
pub use volume::Volume;
