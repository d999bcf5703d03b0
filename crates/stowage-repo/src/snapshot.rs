//! Snapshot: the archives of one backup run plus aggregate statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_reduce::{ChunkHash, EncryptionKey};
use stowage_storage::BackendManager;
use tracing::{debug, instrument};

use crate::archive::Archive;
use crate::error::{RepoError, RepoResult};
use crate::index::ChunkIndex;
use crate::sealed::{get_sealed, put_sealed};
use crate::stats::Stats;

/// Backend key of a persisted snapshot.
pub fn snapshot_key(id: &str) -> String {
    format!("snapshots/{}", id)
}

/// Fresh 8-hex-digit id for snapshots and volumes.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// One point-in-time set of archives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Short random id
    pub id: String,
    /// Free-form description
    pub description: String,
    /// Creation time
    pub date: DateTime<Utc>,
    /// Totals over all archives
    pub stats: Stats,
    /// Archives keyed by path
    pub archives: BTreeMap<String, Archive>,
}

impl Snapshot {
    /// Empty snapshot with a fresh id.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            description: description.into(),
            date: Utc::now(),
            stats: Stats::default(),
            archives: BTreeMap::new(),
        }
    }

    /// Archive at `path`.
    pub fn archive(&self, path: &str) -> RepoResult<&Archive> {
        self.archives
            .get(path)
            .ok_or_else(|| RepoError::not_found("archive", path))
    }

    /// Archives ordered by path.
    pub fn archives_sorted(&self) -> Vec<&Archive> {
        self.archives.values().collect()
    }

    /// Every chunk reference of every archive, with repetitions.
    pub fn chunk_hashes(&self) -> impl Iterator<Item = &ChunkHash> + '_ {
        self.archives.values().flat_map(|a| a.chunk_hashes())
    }

    /// Insert or replace an archive, keeping stats in step. Returns the
    /// replaced archive, whose chunk references the caller must release.
    pub fn add_archive(&mut self, archive: Archive) -> Option<Archive> {
        self.stats += archive.stats();
        let replaced = self.archives.insert(archive.path.clone(), archive);
        if let Some(old) = &replaced {
            self.stats -= old.stats();
        }
        replaced
    }

    /// Remove an archive and its share of the stats.
    pub fn remove_archive(&mut self, path: &str) -> Option<Archive> {
        let removed = self.archives.remove(path)?;
        self.stats -= removed.stats();
        Some(removed)
    }

    /// Copy this snapshot under a fresh id. Every chunk reference is counted
    /// again for the copy; no backend I/O happens.
    #[instrument(skip(self, index), fields(source = %self.id))]
    pub async fn clone_snapshot(&self, index: &ChunkIndex) -> RepoResult<Snapshot> {
        let copy = Snapshot {
            id: short_id(),
            description: self.description.clone(),
            date: Utc::now(),
            stats: self.stats,
            archives: self.archives.clone(),
        };
        index.add_references(&copy.id, copy.chunk_hashes()).await?;
        debug!(clone = %copy.id, archives = copy.archives.len(), "snapshot cloned");
        Ok(copy)
    }

    /// Persist under `snapshots/<id>` on every backend.
    pub async fn save(&self, backends: &BackendManager, key: &EncryptionKey) -> RepoResult<()> {
        put_sealed(backends, &snapshot_key(&self.id), self, key).await
    }

    /// Load `snapshots/<id>`.
    pub async fn load(backends: &BackendManager, key: &EncryptionKey, id: &str) -> RepoResult<Snapshot> {
        match get_sealed(backends, &snapshot_key(id), key).await {
            Err(RepoError::NotFound { .. }) => Err(RepoError::not_found("snapshot", id)),
            other => other,
        }
    }
}
