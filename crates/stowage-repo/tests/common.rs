//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stowage_reduce::{ChunkerConfig, CompressionAlgorithm, KdfCost};
use stowage_repo::{
    ChunkIndex, EngineConfig, Repository, Snapshot, StoreEvent, StoreOptions,
};
use stowage_storage::{BackendRegistry, MemoryBackend};
use tempfile::TempDir;

pub const PASSWORD: &str = "correct horse battery staple";

/// Engine configuration with cheap key derivation and small chunks, so
/// modest files still span many chunks.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        kdf: KdfCost::insecure_fast(),
        chunker: ChunkerConfig {
            min_size: 1024,
            avg_size: 4096,
            max_size: 16 * 1024,
        },
        ..EngineConfig::default()
    }
}

/// Deterministic incompressible-looking bytes.
pub fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// A repository over M in-memory backends plus a scratch source tree.
pub struct TestRepo {
    pub registry: BackendRegistry,
    pub repo: Repository,
    pub index: Arc<ChunkIndex>,
    pub mems: Vec<Arc<MemoryBackend>>,
    pub volume: String,
    pub source: TempDir,
    pub url: String,
}

impl TestRepo {
    /// Repository over `backends` memory backends with [`fast_config`].
    pub async fn new(backends: usize) -> Self {
        Self::with_config(backends, fast_config()).await
    }

    pub async fn with_config(backends: usize, config: EngineConfig) -> Self {
        let registry = BackendRegistry::default();
        let url = "mem://b0".to_string();
        let mut repo = Repository::create(&url, PASSWORD, &registry, config)
            .await
            .expect("create repository");
        for i in 1..backends {
            repo.add_backend(&format!("mem://b{}", i)).await.expect("add backend");
        }
        let volume = repo.add_volume("test", "integration volume");
        repo.save().await.expect("save repository");

        let mems = (0..backends)
            .map(|i| registry.memory_backend(&format!("b{}", i)).expect("memory backend"))
            .collect();
        let index = Arc::new(repo.open_index().await.expect("open index"));

        Self {
            registry,
            repo,
            index,
            mems,
            volume,
            source: TempDir::new().expect("tempdir"),
            url,
        }
    }

    pub fn root(&self) -> &Path {
        self.source.path()
    }

    /// Write `data` to `rel` under the source root, creating parents.
    pub fn write_file(&self, rel: &str, data: &[u8]) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, data).expect("write source file");
        path
    }

    pub fn disable(&self, i: usize) {
        self.mems[i].set_available(false);
    }

    pub fn enable(&self, i: usize) {
        self.mems[i].set_available(true);
    }

    /// Number of chunk pieces stored on backend `i`.
    pub fn pieces_on(&self, i: usize) -> usize {
        self.mems[i].count_prefix("chunks/")
    }

    /// Run an add of `targets` into `snapshot` and wait for it.
    pub async fn add(
        &self,
        snapshot: Snapshot,
        targets: &[&str],
        opts: &StoreOptions,
    ) -> (Vec<StoreEvent>, stowage_repo::RepoResult<Snapshot>) {
        let targets: Vec<PathBuf> = targets.iter().map(PathBuf::from).collect();
        let handle = self
            .repo
            .add(Arc::clone(&self.index), snapshot, self.root(), &targets, opts)
            .expect("start add");
        handle.collect().await
    }

    /// Store the whole source tree as a new committed snapshot.
    pub async fn store_all(&mut self, opts: &StoreOptions) -> Snapshot {
        let (_, snapshot) = self.add(Snapshot::new("all"), &[], opts).await;
        let snapshot = snapshot.expect("add");
        self.commit(&snapshot).await;
        snapshot
    }

    pub async fn commit(&mut self, snapshot: &Snapshot) {
        let volume = self.volume.clone();
        self.repo
            .commit_snapshot(&volume, snapshot, &self.index)
            .await
            .expect("commit snapshot");
    }
}

/// Store options with compression on and the given tolerance.
pub fn opts(failure_tolerance: usize) -> StoreOptions {
    StoreOptions {
        compression: CompressionAlgorithm::Zstd { level: 3 },
        failure_tolerance,
        ..StoreOptions::default()
    }
}
