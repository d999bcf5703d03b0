//! Pack: physically delete chunks no snapshot references any more.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stowage_reduce::ChunkHash;
use stowage_storage::BackendManager;
use tracing::{info, instrument, warn};

use crate::error::RepoResult;
use crate::index::ChunkIndex;
use crate::progress::{Progress, TaskHandle};

/// Outcome of a pack run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackReport {
    /// Bytes of pieces actually deleted
    pub freed_bytes: u64,
    /// Descriptors removed from the index
    pub chunks_removed: usize,
    /// Piece deletions that failed and were skipped
    pub delete_failures: usize,
}

/// Per-chunk progress of a pack run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackEvent {
    /// All reachable pieces of a chunk were deleted and its descriptor dropped
    ChunkRemoved {
        /// Chunk hash
        hash: ChunkHash,
        /// Bytes freed for this chunk
        freed_bytes: u64,
    },
    /// One piece could not be deleted; it is left behind
    DeleteFailed {
        /// Chunk hash
        hash: ChunkHash,
        /// Backend that refused
        backend: String,
        /// Error text
        error: String,
    },
}

/// Delete every unreferenced chunk and return what was freed.
pub async fn pack(index: &ChunkIndex, backends: &BackendManager) -> RepoResult<PackReport> {
    run_pack(index, backends, None).await
}

/// Run [`pack`] as a background task with a progress stream.
pub fn spawn_pack(
    index: Arc<ChunkIndex>,
    backends: Arc<BackendManager>,
    capacity: usize,
) -> TaskHandle<PackEvent, PackReport> {
    TaskHandle::spawn(capacity, move |progress| async move {
        run_pack(&index, &backends, Some(&progress)).await
    })
}

#[instrument(skip_all)]
async fn run_pack(
    index: &ChunkIndex,
    backends: &BackendManager,
    progress: Option<&Progress<PackEvent>>,
) -> RepoResult<PackReport> {
    let mut report = PackReport::default();
    let candidates = index.unreferenced();
    info!(candidates = candidates.len(), "pack started");

    for hash in candidates {
        if let Some(p) = progress {
            p.check_cancelled()?;
        }
        // A concurrent store may have revived the chunk since the scan.
        let _guard = index.lock(&hash).await;
        let Some(descriptor) = index.get(&hash) else {
            continue;
        };
        if !descriptor.refs.is_empty() {
            continue;
        }

        let results = backends.delete_pieces(&descriptor.piece_locations).await;
        let mut freed = 0;
        for (location, result) in descriptor.piece_locations.iter().zip(results) {
            match result {
                Ok(()) => freed += descriptor.piece_size,
                Err(e) => {
                    warn!(hash = %hash.short(), backend = %location.backend, error = %e, "piece delete failed");
                    report.delete_failures += 1;
                    if let Some(p) = progress {
                        p.emit(PackEvent::DeleteFailed {
                            hash,
                            backend: location.backend.clone(),
                            error: e.to_string(),
                        })
                        .await;
                    }
                }
            }
        }

        if index.remove_if_unreferenced(&hash).is_some() {
            report.chunks_removed += 1;
            report.freed_bytes += freed;
            if let Some(p) = progress {
                p.emit(PackEvent::ChunkRemoved {
                    hash,
                    freed_bytes: freed,
                })
                .await;
            }
        }
    }

    info!(
        freed_bytes = report.freed_bytes,
        chunks_removed = report.chunks_removed,
        delete_failures = report.delete_failures,
        "pack finished"
    );
    Ok(report)
}
