//! Repository: the password-protected root object.
//!
//! The root blob holds the wrapped master key next to the encrypted
//! repository metadata (volumes and backend URLs). Chunks, snapshots and
//! the chunk index are all encrypted under keys derived from the master
//! key, so changing the password only re-wraps that one key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use stowage_reduce::{
    unwrap_master_key, wrap_master_key, EncryptionKey, KdfCost, ReductionPipeline, WrappedKey,
};
use stowage_storage::{BackendInfo, BackendManager, BackendRegistry, StorageError};
use tracing::{debug, info, instrument};

use crate::config::{EngineConfig, StoreOptions, VerifyOptions};
use crate::error::{RepoError, RepoResult};
use crate::index::ChunkIndex;
use crate::pack::{PackEvent, PackReport};
use crate::progress::TaskHandle;
use crate::reader::ArchiveReader;
use crate::sealed::{open_value, seal_value};
use crate::snapshot::{snapshot_key, Snapshot};
use crate::store::{StoreContext, StoreEvent};
use crate::verify::{spawn_verify, VerifyEvent, VerifyReport, VerifyScope};
use crate::volume::Volume;

/// Backend key of the repository root
pub const REPOSITORY_KEY: &str = "repository";

const REPOSITORY_FORMAT_VERSION: u32 = 1;

/// Decrypted repository metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMeta {
    /// Creation time
    pub created: DateTime<Utc>,
    /// Volumes in creation order
    pub volumes: Vec<Volume>,
    /// Backend URLs in piece order
    pub backend_urls: Vec<String>,
}

/// What is actually written under [`REPOSITORY_KEY`].
#[derive(Serialize, Deserialize)]
struct SealedRepository {
    version: u32,
    wrapped_key: WrappedKey,
    body: Vec<u8>,
}

#[derive(Serialize)]
struct Description<'a> {
    version: u32,
    created: DateTime<Utc>,
    kdf_algorithm: &'a str,
    kdf_cost: KdfCost,
    backends: &'a [String],
    volumes: &'a [Volume],
}

/// Exact id, else the single id starting with `prefix`.
fn resolve_prefix<'a, I>(kind: &'static str, prefix: &str, ids: I) -> RepoResult<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    if prefix.is_empty() {
        return Err(RepoError::not_found(kind, prefix));
    }
    let mut matches = Vec::new();
    for id in ids {
        if id == prefix {
            return Ok(id);
        }
        if id.starts_with(prefix) {
            matches.push(id);
        }
    }
    match matches.as_slice() {
        [] => Err(RepoError::not_found(kind, prefix)),
        [one] => Ok(*one),
        _ => Err(RepoError::Ambiguous {
            kind,
            prefix: prefix.to_string(),
        }),
    }
}

/// An unlocked repository.
pub struct Repository {
    meta: RepositoryMeta,
    wrapped_key: WrappedKey,
    master_key: EncryptionKey,
    backends: Arc<BackendManager>,
    pipeline: Arc<ReductionPipeline>,
    registry: BackendRegistry,
    config: EngineConfig,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("backends", &self.meta.backend_urls)
            .field("volumes", &self.meta.volumes.len())
            .finish()
    }
}

async fn wrap_blocking(master: &EncryptionKey, password: &str, cost: KdfCost) -> RepoResult<WrappedKey> {
    let (master, password) = (master.clone(), password.to_string());
    Ok(tokio::task::spawn_blocking(move || wrap_master_key(&master, &password, cost)).await??)
}

impl Repository {
    /// Create a new repository on the backend at `url`.
    ///
    /// Fails with `Configuration` if a repository already exists there.
    #[instrument(skip(password, registry, config))]
    pub async fn create(
        url: &str,
        password: &str,
        registry: &BackendRegistry,
        config: EngineConfig,
    ) -> RepoResult<Self> {
        config.validate()?;
        let backend = registry.resolve(url)?;
        match backend.get(REPOSITORY_KEY).await {
            Ok(_) => {
                return Err(RepoError::Configuration(format!(
                    "a repository already exists at {}",
                    backend.location()
                )))
            }
            Err(StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        backend.init_repository().await?;

        let master_key = EncryptionKey::generate();
        let wrapped_key = wrap_blocking(&master_key, password, config.kdf).await?;
        let repo = Self {
            meta: RepositoryMeta {
                created: Utc::now(),
                volumes: Vec::new(),
                backend_urls: vec![backend.location()],
            },
            wrapped_key,
            pipeline: Arc::new(ReductionPipeline::with_master_key(master_key.clone())),
            master_key,
            backends: Arc::new(BackendManager::with_backends(vec![backend])),
            registry: registry.clone(),
            config,
        };
        repo.save().await?;
        info!(location = url, "repository created");
        Ok(repo)
    }

    /// Unlock the repository at `url` and reconnect every recorded backend.
    ///
    /// A wrong password fails with `Authentication`.
    #[instrument(skip(password, registry, config))]
    pub async fn open(
        url: &str,
        password: &str,
        registry: &BackendRegistry,
        config: EngineConfig,
    ) -> RepoResult<Self> {
        config.validate()?;
        let backend = registry.resolve(url)?;
        let blob = match backend.get(REPOSITORY_KEY).await {
            Ok(blob) => blob,
            Err(StorageError::NotFound { .. }) => return Err(RepoError::not_found("repository", url)),
            Err(e) => return Err(e.into()),
        };
        let sealed: SealedRepository = bincode::deserialize(&blob)?;
        if sealed.version != REPOSITORY_FORMAT_VERSION {
            return Err(RepoError::Serialization(format!(
                "unsupported repository version {}",
                sealed.version
            )));
        }

        let wrapped = sealed.wrapped_key.clone();
        let password = password.to_string();
        let master_key = tokio::task::spawn_blocking(move || unwrap_master_key(&wrapped, &password)).await??;
        let meta: RepositoryMeta = open_value(&sealed.body, &master_key)?;

        let backends = BackendManager::new();
        for recorded in &meta.backend_urls {
            backends.push(registry.resolve(recorded)?);
        }
        info!(backends = backends.len(), volumes = meta.volumes.len(), "repository opened");

        Ok(Self {
            meta,
            wrapped_key: sealed.wrapped_key,
            pipeline: Arc::new(ReductionPipeline::with_master_key(master_key.clone())),
            master_key,
            backends: Arc::new(backends),
            registry: registry.clone(),
            config,
        })
    }

    async fn write_root(&self, wrapped_key: &WrappedKey) -> RepoResult<()> {
        let sealed = SealedRepository {
            version: REPOSITORY_FORMAT_VERSION,
            wrapped_key: wrapped_key.clone(),
            body: seal_value(&self.meta, &self.master_key)?,
        };
        let blob = bincode::serialize(&sealed)?;
        self.backends.put_metadata(REPOSITORY_KEY, &blob).await?;
        Ok(())
    }

    /// Persist the repository root on every backend.
    #[instrument(skip(self))]
    pub async fn save(&self) -> RepoResult<()> {
        self.write_root(&self.wrapped_key).await?;
        debug!(volumes = self.meta.volumes.len(), "repository saved");
        Ok(())
    }

    /// Re-wrap the master key under `new_password` and save. Chunks,
    /// snapshots and the index stay readable as they are.
    #[instrument(skip_all)]
    pub async fn change_password(&mut self, new_password: &str) -> RepoResult<()> {
        let wrapped = wrap_blocking(&self.master_key, new_password, self.config.kdf).await?;
        self.write_root(&wrapped).await?;
        self.wrapped_key = wrapped;
        info!("repository password changed");
        Ok(())
    }

    /// Decrypted metadata.
    pub fn meta(&self) -> &RepositoryMeta {
        &self.meta
    }

    /// Engine configuration this repository was opened with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The backend set.
    pub fn backends(&self) -> &Arc<BackendManager> {
        &self.backends
    }

    /// Resolve `url`, bootstrap it and append it as the next backend. Only
    /// chunks written afterwards use it. Call [`Repository::save`] to persist.
    pub async fn add_backend(&mut self, url: &str) -> RepoResult<()> {
        let backend = self.backends.add_backend(url, &self.registry).await?;
        self.meta.backend_urls.push(backend.location());
        Ok(())
    }

    /// Location, protocols and free space of every backend.
    pub async fn backend_info(&self) -> Vec<BackendInfo> {
        self.backends.backend_info().await
    }

    /// Pretty JSON of the repository metadata, without key material.
    pub fn describe_json(&self) -> RepoResult<String> {
        let description = Description {
            version: REPOSITORY_FORMAT_VERSION,
            created: self.meta.created,
            kdf_algorithm: &self.wrapped_key.kdf.algorithm,
            kdf_cost: self.wrapped_key.kdf.cost(),
            backends: &self.meta.backend_urls,
            volumes: &self.meta.volumes,
        };
        Ok(serde_json::to_string_pretty(&description)?)
    }

    /// Add an empty volume and return its id. Call [`Repository::save`] to persist.
    pub fn add_volume(&mut self, name: &str, description: &str) -> String {
        let volume = Volume::new(name, description);
        let id = volume.id.clone();
        info!(volume = %id, name, "volume added");
        self.meta.volumes.push(volume);
        id
    }

    /// All volumes in creation order.
    pub fn volumes(&self) -> &[Volume] {
        &self.meta.volumes
    }

    /// Volume by exact id or unique id prefix.
    pub fn find_volume(&self, prefix: &str) -> RepoResult<&Volume> {
        let id = resolve_prefix("volume", prefix, self.meta.volumes.iter().map(|v| v.id.as_str()))?;
        self.meta
            .volumes
            .iter()
            .find(|v| v.id == id)
            .ok_or_else(|| RepoError::not_found("volume", prefix))
    }

    fn find_volume_mut(&mut self, prefix: &str) -> RepoResult<&mut Volume> {
        let id = self.find_volume(prefix)?.id.clone();
        self.meta
            .volumes
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| RepoError::not_found("volume", prefix))
    }

    /// Full id of the snapshot matching `prefix` exactly or uniquely.
    pub fn find_snapshot(&self, prefix: &str) -> RepoResult<String> {
        let ids = self
            .meta
            .volumes
            .iter()
            .flat_map(|v| v.snapshots.iter().map(String::as_str));
        resolve_prefix("snapshot", prefix, ids).map(str::to_string)
    }

    /// Load a snapshot by id or unique prefix.
    pub async fn load_snapshot(&self, prefix: &str) -> RepoResult<Snapshot> {
        let id = self.find_snapshot(prefix)?;
        Snapshot::load(&self.backends, &self.master_key, &id).await
    }

    /// Snapshots of one volume, oldest first.
    pub async fn volume_snapshots(&self, volume: &str) -> RepoResult<Vec<Snapshot>> {
        let ids = &self.find_volume(volume)?.snapshots;
        try_join_all(ids.iter().map(|id| Snapshot::load(&self.backends, &self.master_key, id))).await
    }

    /// Persist `snapshot` and the index, then list the snapshot in `volume`
    /// and save the root. The root is written last, so a failure leaves the
    /// snapshot unlisted rather than listed without its data.
    #[instrument(skip(self, snapshot, index), fields(snapshot = %snapshot.id))]
    pub async fn commit_snapshot(&mut self, volume: &str, snapshot: &Snapshot, index: &ChunkIndex) -> RepoResult<()> {
        let volume_id = self.find_volume(volume)?.id.clone();
        snapshot.save(&self.backends, &self.master_key).await?;
        index.save(&self.backends, &self.master_key).await?;
        let listed = self.meta.volumes.clone();
        self.find_volume_mut(&volume_id)?.add_snapshot(&snapshot.id);
        if let Err(e) = self.save().await {
            self.meta.volumes = listed;
            return Err(e);
        }
        info!(volume = %volume_id, stats = %snapshot.stats, "snapshot committed");
        Ok(())
    }

    /// Unlist a snapshot, release its chunk references and delete its
    /// metadata. Chunk data is reclaimed by the next pack.
    #[instrument(skip(self, index))]
    pub async fn remove_snapshot(&mut self, prefix: &str, index: &ChunkIndex) -> RepoResult<()> {
        let id = self.find_snapshot(prefix)?;
        let listed = self.meta.volumes.clone();
        for volume in &mut self.meta.volumes {
            volume.remove_snapshot(&id);
        }
        if let Err(e) = self.save().await {
            self.meta.volumes = listed;
            return Err(e);
        }
        index.remove_snapshot(&id);
        index.save(&self.backends, &self.master_key).await?;
        self.backends.delete_metadata(&snapshot_key(&id)).await?;
        info!(snapshot = %id, "snapshot removed");
        Ok(())
    }

    /// Load the chunk index.
    pub async fn open_index(&self) -> RepoResult<ChunkIndex> {
        ChunkIndex::load(&self.backends, &self.master_key).await
    }

    /// Persist the chunk index.
    pub async fn save_index(&self, index: &ChunkIndex) -> RepoResult<()> {
        index.save(&self.backends, &self.master_key).await
    }

    /// Handles for [`crate::store::add`].
    pub fn store_context(&self, index: Arc<ChunkIndex>) -> RepoResult<StoreContext> {
        Ok(StoreContext {
            backends: Arc::clone(&self.backends),
            index,
            pipeline: Arc::clone(&self.pipeline),
            chunker: stowage_reduce::Chunker::with_config(self.config.chunker.clone())?,
            progress_capacity: self.config.progress_capacity,
        })
    }

    /// Add `targets` under `root` to `snapshot` in the background.
    pub fn add(
        &self,
        index: Arc<ChunkIndex>,
        snapshot: Snapshot,
        root: &Path,
        targets: &[PathBuf],
        opts: &StoreOptions,
    ) -> RepoResult<TaskHandle<StoreEvent, Snapshot>> {
        crate::store::add(&self.store_context(index)?, snapshot, root, targets, opts)
    }

    /// Reader for archive content.
    pub fn reader(&self) -> ArchiveReader {
        ArchiveReader::new(Arc::clone(&self.backends), Arc::clone(&self.pipeline))
    }

    /// Delete unreferenced chunks and save the index.
    pub async fn pack(&self, index: &ChunkIndex) -> RepoResult<PackReport> {
        let report = crate::pack::pack(index, &self.backends).await?;
        self.save_index(index).await?;
        Ok(report)
    }

    /// Pack in the background. The caller saves the index afterwards.
    pub fn spawn_pack(&self, index: Arc<ChunkIndex>) -> TaskHandle<PackEvent, PackReport> {
        crate::pack::spawn_pack(index, Arc::clone(&self.backends), self.config.progress_capacity)
    }

    /// Verify a sample of the archives in `scope`.
    #[instrument(skip(self))]
    pub async fn verify(
        &self,
        scope: VerifyScope,
        opts: VerifyOptions,
    ) -> RepoResult<TaskHandle<VerifyEvent, VerifyReport>> {
        let snapshots = match &scope {
            VerifyScope::Repository => {
                let mut all = Vec::new();
                for volume in &self.meta.volumes {
                    all.extend(self.volume_snapshots(&volume.id).await?);
                }
                all
            }
            VerifyScope::Volume(volume) => self.volume_snapshots(volume).await?,
            VerifyScope::Snapshot(prefix) => vec![self.load_snapshot(prefix).await?],
        };
        spawn_verify(self.reader(), snapshots, opts, self.config.progress_capacity)
    }
}
