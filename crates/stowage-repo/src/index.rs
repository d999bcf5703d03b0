//! ChunkIndex: the shared dedup map from content hash to stored chunk.
//!
//! Every descriptor tracks which snapshots reference it. A chunk whose
//! reference set is empty is garbage and only [`crate::pack`] deletes it.
//! Check-then-insert on one hash is serialized by a striped async lock, so
//! concurrent stores of the same content write it once.

use std::collections::BTreeMap;
use std::future::Future;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use stowage_reduce::{ChunkHash, Codec, EncryptionKey};
use stowage_storage::{BackendManager, PieceLocation, RedundancyLayout, StoredChunk};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

use crate::archive::ChunkRef;
use crate::error::{RepoError, RepoResult};
use crate::sealed::{get_sealed, put_sealed};

/// Backend key of the persisted index
pub const INDEX_KEY: &str = "index";

const LOCK_STRIPES: usize = 64;
const INDEX_FORMAT_VERSION: u32 = 1;

/// Everything known about one stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// BLAKE3 hash of the plaintext
    pub hash: ChunkHash,
    /// Plaintext bytes
    pub plain_size: u64,
    /// Bytes after compression and encryption
    pub encoded_size: u64,
    /// Bytes of every redundancy piece
    pub piece_size: u64,
    /// Piece counts (total / required)
    pub layout: RedundancyLayout,
    /// Algorithms used when the chunk was written
    pub codec: Codec,
    /// Where each piece lives, in piece order (`len == layout.total`)
    pub piece_locations: Vec<PieceLocation>,
    /// Reference count per snapshot id
    pub refs: BTreeMap<String, u32>,
}

impl ChunkDescriptor {
    /// Descriptor for a freshly written chunk, with no references yet.
    pub fn new(hash: ChunkHash, plain_size: u64, encoded_size: u64, codec: Codec, stored: StoredChunk) -> Self {
        Self {
            hash,
            plain_size,
            encoded_size,
            piece_size: stored.piece_size,
            layout: stored.layout,
            codec,
            piece_locations: stored.locations,
            refs: BTreeMap::new(),
        }
    }

    /// Pieces written (M)
    pub fn total_pieces(&self) -> usize {
        self.layout.total
    }

    /// Pieces needed to rebuild (M − F)
    pub fn required_pieces(&self) -> usize {
        self.layout.required
    }

    /// Total references across all snapshots
    pub fn ref_count(&self) -> u64 {
        self.refs.values().map(|&n| n as u64).sum()
    }

    /// Bytes occupied on all backends together
    pub fn stored_bytes(&self) -> u64 {
        self.piece_size * self.piece_locations.len() as u64
    }

    /// The reference archives keep to this chunk
    pub fn chunk_ref(&self) -> ChunkRef {
        ChunkRef {
            hash: self.hash,
            plain_size: self.plain_size,
            encoded_size: self.encoded_size,
            layout: self.layout,
            codec: self.codec,
        }
    }

    fn add_ref(&mut self, snapshot_id: &str) {
        *self.refs.entry(snapshot_id.to_string()).or_insert(0) += 1;
    }
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    chunks: Vec<ChunkDescriptor>,
}

/// Hash → descriptor map with reference counting.
pub struct ChunkIndex {
    chunks: DashMap<ChunkHash, ChunkDescriptor>,
    stripes: Vec<Mutex<()>>,
}

impl Default for ChunkIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChunkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkIndex").field("chunks", &self.len()).finish()
    }
}

impl ChunkIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self {
            chunks: DashMap::new(),
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn from_descriptors(descriptors: Vec<ChunkDescriptor>) -> Self {
        let index = Self::new();
        for d in descriptors {
            index.chunks.insert(d.hash, d);
        }
        index
    }

    /// Number of distinct chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when no chunk is known.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Whether `hash` is stored.
    pub fn contains(&self, hash: &ChunkHash) -> bool {
        self.chunks.contains_key(hash)
    }

    /// Copy of the descriptor for `hash`.
    pub fn get(&self, hash: &ChunkHash) -> Option<ChunkDescriptor> {
        self.chunks.get(hash).map(|d| d.clone())
    }

    /// All descriptors, sorted by hash.
    pub fn descriptors(&self) -> Vec<ChunkDescriptor> {
        let mut all: Vec<ChunkDescriptor> = self.chunks.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.hash.cmp(&b.hash));
        all
    }

    /// Bytes occupied by all pieces of all chunks.
    pub fn stored_bytes(&self) -> u64 {
        self.chunks.iter().map(|e| e.stored_bytes()).sum()
    }

    /// Serialize check-then-act sequences on `hash`.
    pub(crate) async fn lock(&self, hash: &ChunkHash) -> MutexGuard<'_, ()> {
        let stripe = u16::from_le_bytes([hash.0[0], hash.0[1]]) as usize % self.stripes.len();
        self.stripes[stripe].lock().await
    }

    fn bump_existing(&self, hash: &ChunkHash, snapshot_id: &str) -> Option<ChunkDescriptor> {
        let mut entry = self.chunks.get_mut(hash)?;
        entry.add_ref(snapshot_id);
        Some(entry.clone())
    }

    /// Dedup-aware store of one chunk.
    ///
    /// If `hash` is known, a reference for `snapshot_id` is added and `write`
    /// is never called. Otherwise `write` stores the chunk and its descriptor
    /// is inserted with one reference. Returns the descriptor and whether the
    /// chunk was new. Concurrent calls for one hash write at most once.
    pub async fn store_chunk<F, Fut>(
        &self,
        hash: ChunkHash,
        snapshot_id: &str,
        write: F,
    ) -> RepoResult<(ChunkDescriptor, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RepoResult<ChunkDescriptor>>,
    {
        let _guard = self.lock(&hash).await;
        if let Some(existing) = self.bump_existing(&hash, snapshot_id) {
            return Ok((existing, false));
        }
        let mut descriptor = write().await?;
        descriptor.add_ref(snapshot_id);
        self.chunks.insert(hash, descriptor.clone());
        debug!(hash = %hash.short(), snapshot = snapshot_id, "chunk indexed");
        Ok((descriptor, true))
    }

    /// Record a chunk written elsewhere. If the hash is already present only a
    /// reference is added and `false` is returned.
    pub async fn insert_chunk(&self, snapshot_id: &str, mut descriptor: ChunkDescriptor) -> bool {
        let hash = descriptor.hash;
        let _guard = self.lock(&hash).await;
        if self.bump_existing(&hash, snapshot_id).is_some() {
            return false;
        }
        descriptor.add_ref(snapshot_id);
        self.chunks.insert(hash, descriptor);
        true
    }

    /// Add one reference from `snapshot_id` to an existing chunk.
    pub async fn add_reference(&self, hash: &ChunkHash, snapshot_id: &str) -> RepoResult<()> {
        let _guard = self.lock(hash).await;
        self.bump_existing(hash, snapshot_id)
            .map(|_| ())
            .ok_or_else(|| RepoError::not_found("chunk", hash.to_hex()))
    }

    /// Add one reference from `snapshot_id` per listed hash. Fails without
    /// partial effect if any hash is unknown, including one a concurrent pack
    /// removed midway: references already added are released again.
    pub async fn add_references<'a, I>(&self, snapshot_id: &str, hashes: I) -> RepoResult<()>
    where
        I: IntoIterator<Item = &'a ChunkHash>,
    {
        let mut added: Vec<ChunkHash> = Vec::new();
        for hash in hashes {
            if let Err(e) = self.add_reference(hash, snapshot_id).await {
                for done in &added {
                    self.release_reference(done, snapshot_id);
                }
                debug!(snapshot = snapshot_id, rolled_back = added.len(), "reference batch rolled back");
                return Err(e);
            }
            added.push(*hash);
        }
        Ok(())
    }

    /// Drop one reference from `snapshot_id`. Returns false if there was none.
    pub fn release_reference(&self, hash: &ChunkHash, snapshot_id: &str) -> bool {
        let Some(mut entry) = self.chunks.get_mut(hash) else {
            return false;
        };
        let remaining = match entry.refs.get_mut(snapshot_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return false,
        };
        if remaining == 0 {
            entry.refs.remove(snapshot_id);
        }
        true
    }

    /// Drop every reference held by `snapshot_id`. Nothing is deleted
    /// physically; returns how many chunks the snapshot referenced.
    #[instrument(skip(self))]
    pub fn remove_snapshot(&self, snapshot_id: &str) -> usize {
        let mut touched = 0;
        for mut entry in self.chunks.iter_mut() {
            if entry.refs.remove(snapshot_id).is_some() {
                touched += 1;
            }
        }
        info!(snapshot = snapshot_id, chunks = touched, "snapshot references released");
        touched
    }

    /// Number of chunks referenced by `snapshot_id`.
    pub fn referenced_by(&self, snapshot_id: &str) -> usize {
        self.chunks
            .iter()
            .filter(|e| e.refs.contains_key(snapshot_id))
            .count()
    }

    /// Hashes of chunks nothing references, sorted.
    pub fn unreferenced(&self) -> Vec<ChunkHash> {
        let mut hashes: Vec<ChunkHash> = self
            .chunks
            .iter()
            .filter(|e| e.refs.is_empty())
            .map(|e| *e.key())
            .collect();
        hashes.sort();
        hashes
    }

    /// Remove the descriptor if it is still unreferenced. Callers hold the
    /// hash's lock so no store can revive it concurrently.
    pub(crate) fn remove_if_unreferenced(&self, hash: &ChunkHash) -> Option<ChunkDescriptor> {
        self.chunks
            .remove_if(hash, |_, d| d.refs.is_empty())
            .map(|(_, d)| d)
    }

    /// Load the index persisted in the repository; a repository without one
    /// yields an empty index.
    #[instrument(skip(backends, key))]
    pub async fn load(backends: &BackendManager, key: &EncryptionKey) -> RepoResult<Self> {
        match get_sealed::<IndexFile>(backends, INDEX_KEY, key).await {
            Ok(file) => {
                if file.version != INDEX_FORMAT_VERSION {
                    return Err(RepoError::Serialization(format!(
                        "unsupported index version {}",
                        file.version
                    )));
                }
                info!(chunks = file.chunks.len(), "chunk index loaded");
                Ok(Self::from_descriptors(file.chunks))
            }
            Err(RepoError::NotFound { .. }) => {
                debug!("no chunk index stored yet");
                Ok(Self::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the whole index. Each backend replaces the blob atomically.
    #[instrument(skip(self, backends, key), fields(chunks = self.len()))]
    pub async fn save(&self, backends: &BackendManager, key: &EncryptionKey) -> RepoResult<()> {
        let file = IndexFile {
            version: INDEX_FORMAT_VERSION,
            chunks: self.descriptors(),
        };
        put_sealed(backends, INDEX_KEY, &file, key).await
    }
}
