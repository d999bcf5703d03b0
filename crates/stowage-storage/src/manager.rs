//! BackendManager: the ordered backend set and redundant piece I/O across it.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::backend::{Backend, BackendRegistry};
use crate::error::{StorageError, StorageResult};
use crate::redundancy::RedundancyLayout;

/// Backend key of piece `index` of the chunk identified by `chunk_id`.
pub fn piece_key(chunk_id: &str, index: usize) -> String {
    format!("chunks/{}.{}", chunk_id, index)
}

/// Where one piece of a chunk lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PieceLocation {
    /// Location URL of the backend holding the piece
    pub backend: String,
    /// Key of the piece on that backend
    pub key: String,
}

/// Result of a redundant chunk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Layout the chunk was encoded with
    pub layout: RedundancyLayout,
    /// One entry per piece, in piece order
    pub locations: Vec<PieceLocation>,
    /// Bytes of every piece
    pub piece_size: u64,
    /// Pieces confirmed written (at least `layout.required`)
    pub written: usize,
}

/// Read-only report about one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    /// Backend URL
    pub location: String,
    /// Schemes served by the implementation
    pub protocols: Vec<String>,
    /// Free bytes, or `None` when the backend could not be asked
    pub available_space: Option<u64>,
}

/// Ordered set of backends. Piece `i` of every chunk goes to backend `i`.
#[derive(Default)]
pub struct BackendManager {
    backends: RwLock<Vec<Arc<dyn Backend>>>,
}

impl std::fmt::Debug for BackendManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendManager")
            .field("backends", &self.locations())
            .finish()
    }
}

impl BackendManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager over an already-resolved backend list.
    pub fn with_backends(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self {
            backends: RwLock::new(backends),
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn Backend>> {
        self.backends.read().clone()
    }

    /// Number of backends (M).
    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    /// True when no backend is configured.
    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    /// Locations of all backends, in order.
    pub fn locations(&self) -> Vec<String> {
        self.backends.read().iter().map(|b| b.location()).collect()
    }

    /// Append an already-initialized backend.
    pub fn push(&self, backend: Arc<dyn Backend>) {
        self.backends.write().push(backend);
    }

    /// Resolve `url`, bootstrap its repository layout and append it.
    /// Existing chunks keep their pieces where they are.
    #[instrument(skip(self, registry))]
    pub async fn add_backend(&self, url: &str, registry: &BackendRegistry) -> StorageResult<Arc<dyn Backend>> {
        let backend = registry.resolve(url)?;
        if self.locations().contains(&backend.location()) {
            return Err(StorageError::Configuration(format!(
                "backend {} is already part of this repository",
                backend.location()
            )));
        }
        backend.init_repository().await?;
        self.push(Arc::clone(&backend));
        info!(location = %backend.location(), count = self.len(), "backend added");
        Ok(backend)
    }

    /// Redundancy layout for the current backend count and `tolerance`.
    pub fn layout(&self, tolerance: usize) -> StorageResult<RedundancyLayout> {
        RedundancyLayout::new(self.len(), tolerance)
    }

    /// Encode `data` into M pieces and write piece `i` to backend `i` in
    /// parallel. Succeeds once at least M−F pieces are confirmed; otherwise
    /// removes what was written and fails with `StorageError::Redundancy`.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn write_chunk(&self, chunk_id: &str, data: &[u8], tolerance: usize) -> StorageResult<StoredChunk> {
        let backends = self.snapshot();
        let layout = RedundancyLayout::new(backends.len(), tolerance)?;
        let pieces = layout.encode(data)?;
        let piece_size = layout.piece_size(data.len()) as u64;

        let locations: Vec<PieceLocation> = backends
            .iter()
            .enumerate()
            .map(|(i, b)| PieceLocation {
                backend: b.location(),
                key: piece_key(chunk_id, i),
            })
            .collect();

        let writes = backends
            .iter()
            .zip(pieces)
            .zip(&locations)
            .map(|((backend, piece), loc)| async move { backend.put(&loc.key, piece).await });
        let results = join_all(writes).await;

        let mut written = 0;
        for (loc, result) in locations.iter().zip(&results) {
            match result {
                Ok(()) => written += 1,
                Err(e) => warn!(backend = %loc.backend, key = %loc.key, error = %e, "piece write failed"),
            }
        }

        if written < layout.required {
            let cleanup = locations
                .iter()
                .zip(&results)
                .filter(|(_, r)| r.is_ok())
                .map(|(loc, _)| loc.clone())
                .collect::<Vec<_>>();
            for failure in self.delete_pieces(&cleanup).await.into_iter().filter_map(Result::err) {
                debug!(error = %failure, "cleanup of partial chunk write failed");
            }
            return Err(StorageError::Redundancy {
                needed: layout.required,
                available: written,
            });
        }

        Ok(StoredChunk {
            layout,
            locations,
            piece_size,
            written,
        })
    }

    /// Piece locations of a chunk written with `total` pieces: piece `i` on
    /// backend `i`. Pieces whose backend is no longer configured are omitted
    /// and count as missing.
    pub fn chunk_locations(&self, chunk_id: &str, total: usize) -> Vec<PieceLocation> {
        self.backends
            .read()
            .iter()
            .take(total)
            .enumerate()
            .map(|(i, b)| PieceLocation {
                backend: b.location(),
                key: piece_key(chunk_id, i),
            })
            .collect()
    }

    /// Fetch every listed piece in parallel; unreachable pieces are `None`.
    pub async fn load_pieces(&self, locations: &[PieceLocation]) -> Vec<Option<Vec<u8>>> {
        let backends = self.snapshot();
        let reads = locations.iter().map(|loc| {
            let backend = backends.iter().find(|b| b.location() == loc.backend).cloned();
            async move {
                let backend = backend?;
                match backend.get(&loc.key).await {
                    Ok(data) => Some(data),
                    Err(e) => {
                        debug!(backend = %loc.backend, key = %loc.key, error = %e, "piece unavailable");
                        None
                    }
                }
            }
        });
        join_all(reads).await
    }

    /// Fetch pieces and rebuild the original `len` bytes.
    pub async fn read_chunk(
        &self,
        layout: RedundancyLayout,
        locations: &[PieceLocation],
        len: usize,
    ) -> StorageResult<Vec<u8>> {
        let pieces = self.load_pieces(locations).await;
        layout.decode(pieces, len)
    }

    /// Delete every listed piece. Returns one result per location, in order,
    /// so callers can tolerate individual failures.
    pub async fn delete_pieces(&self, locations: &[PieceLocation]) -> Vec<StorageResult<()>> {
        let backends = self.snapshot();
        let deletes = locations.iter().map(|loc| {
            let backend = backends.iter().find(|b| b.location() == loc.backend).cloned();
            async move {
                match backend {
                    Some(backend) => backend.delete(&loc.key).await,
                    None => Err(StorageError::Unavailable {
                        location: loc.backend.clone(),
                    }),
                }
            }
        });
        join_all(deletes).await
    }

    /// Write a metadata blob to every backend, all or nothing.
    ///
    /// The current value is fetched from every backend first, so an
    /// unreachable backend fails the call before anything is written. If a
    /// write still fails, backends that took the new blob get their previous
    /// value back.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn put_metadata(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let backends = self.snapshot();
        if backends.is_empty() {
            return Err(StorageError::Configuration("no backends configured".to_string()));
        }
        let previous = join_all(backends.iter().map(|b| async move {
            match b.get(key).await {
                Ok(old) => Ok(Some(old)),
                Err(StorageError::NotFound { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        }))
        .await
        .into_iter()
        .collect::<StorageResult<Vec<Option<Vec<u8>>>>>()?;

        let results = join_all(backends.iter().map(|b| b.put(key, data.to_vec()))).await;
        if results.iter().all(Result::is_ok) {
            return Ok(());
        }

        let restores = backends
            .iter()
            .zip(&previous)
            .zip(&results)
            .filter_map(|((backend, old), result)| result.is_ok().then_some((backend, old)))
            .map(|(backend, old)| async move {
                let restored = match old {
                    Some(old) => backend.put(key, old.clone()).await,
                    None => backend.delete(key).await,
                };
                if let Err(e) = restored {
                    warn!(backend = %backend.location(), key, error = %e, "metadata rollback failed");
                }
            });
        join_all(restores).await;
        warn!(key, "metadata write failed, previous value restored");
        results.into_iter().collect()
    }

    /// Read a metadata blob from the first backend that has it.
    pub async fn get_metadata(&self, key: &str) -> StorageResult<Vec<u8>> {
        let mut last_error = StorageError::NotFound { key: key.to_string() };
        for backend in self.snapshot() {
            match backend.get(key).await {
                Ok(data) => return Ok(data),
                Err(StorageError::NotFound { .. }) => {}
                Err(e) => {
                    debug!(backend = %backend.location(), key, error = %e, "metadata read failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Remove a metadata blob from every reachable backend.
    pub async fn delete_metadata(&self, key: &str) -> StorageResult<()> {
        let backends = self.snapshot();
        let results = join_all(backends.iter().map(|b| b.delete(key))).await;
        results.into_iter().collect()
    }

    /// Location, protocols and free space of every backend.
    pub async fn backend_info(&self) -> Vec<BackendInfo> {
        let backends = self.snapshot();
        join_all(backends.iter().map(|b| async move {
            BackendInfo {
                location: b.location(),
                protocols: b.protocols().into_iter().map(String::from).collect(),
                available_space: b.available_space().await.ok(),
            }
        }))
        .await
    }
}
