//! Add: walk source trees into a snapshot, storing only chunks the index
//! has not seen.
//!
//! Files are chunked on a blocking thread and the chunks are handed to the
//! async side through a small bounded channel. Every chunk goes through
//! [`ChunkIndex::store_chunk`], so a chunk shared by concurrent adds is
//! written once and referenced by each snapshot.

use std::fs::{self, File, Metadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use glob::Pattern;
use stowage_reduce::{Chunk, ChunkHash, Chunker, ReduceError, ReductionPipeline};
use stowage_storage::{BackendManager, RedundancyLayout};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::archive::{Archive, ArchiveType};
use crate::config::StoreOptions;
use crate::error::{RepoError, RepoResult};
use crate::index::{ChunkDescriptor, ChunkIndex};
use crate::progress::{Progress, TaskHandle};
use crate::snapshot::Snapshot;

/// Chunks buffered between the reading thread and the storing task.
const CHUNK_CHANNEL_CAPACITY: usize = 4;

/// Shared handles an add needs.
#[derive(Debug, Clone)]
pub struct StoreContext {
    /// Backend set chunks are written to
    pub backends: Arc<BackendManager>,
    /// Dedup index shared by every concurrent add
    pub index: Arc<ChunkIndex>,
    /// Chunk codec holding the repository master key
    pub pipeline: Arc<ReductionPipeline>,
    /// Content-defined chunker
    pub chunker: Chunker,
    /// Capacity of the progress stream
    pub progress_capacity: usize,
}

/// Per-archive progress of an add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// An archive was recorded in the snapshot
    ArchiveStored {
        /// Archive path
        path: String,
        /// Entry kind
        archive_type: ArchiveType,
        /// Logical bytes
        size: u64,
        /// Encoded bytes of chunks written for the first time
        storage_size: u64,
        /// Chunks written by this archive
        new_chunks: usize,
        /// Chunks that were already stored
        reused_chunks: usize,
    },
    /// A source entry could not be read; the add continues without it
    ItemFailed {
        /// Path relative to the root, or as given when outside it
        path: String,
        /// Error text
        error: String,
    },
}

/// Outcome of storing one file.
enum FileOutcome {
    Stored(Archive, usize, usize),
    SourceFailed(RepoError),
}

/// Start adding `targets` (relative to `root`, or absolute) to `snapshot`.
///
/// The snapshot may be fresh or a clone of an earlier one; archives at
/// paths already present are replaced and their old references released
/// once the add succeeds. On failure or cancellation every reference added
/// by this call is dropped again; chunks it wrote stay in the index
/// unreferenced until the next pack.
pub fn add(
    ctx: &StoreContext,
    snapshot: Snapshot,
    root: &Path,
    targets: &[PathBuf],
    opts: &StoreOptions,
) -> RepoResult<TaskHandle<StoreEvent, Snapshot>> {
    RedundancyLayout::new(ctx.backends.len(), opts.failure_tolerance)?;
    let excludes = compile_excludes(&opts.excludes)?;

    let ctx = ctx.clone();
    let root = root.to_path_buf();
    let targets = if targets.is_empty() {
        vec![root.clone()]
    } else {
        targets.iter().map(|t| root.join(t)).collect()
    };
    let opts = opts.clone();

    Ok(TaskHandle::spawn(ctx.progress_capacity, move |progress| async move {
        let mut run = AddRun {
            ctx: &ctx,
            opts: &opts,
            root: &root,
            excludes: &excludes,
            progress: &progress,
            added: Vec::new(),
            replaced: Vec::new(),
        };
        let mut snapshot = snapshot;
        match run.walk(&mut snapshot, &targets).await {
            Ok(()) => {
                for hash in run.replaced.drain(..) {
                    ctx.index.release_reference(&hash, &snapshot.id);
                }
                info!(snapshot = %snapshot.id, stats = %snapshot.stats, "add finished");
                Ok(snapshot)
            }
            Err(e) => {
                for hash in run.added.drain(..) {
                    ctx.index.release_reference(&hash, &snapshot.id);
                }
                warn!(snapshot = %snapshot.id, error = %e, "add aborted, references rolled back");
                Err(e)
            }
        }
    }))
}

fn compile_excludes(patterns: &[String]) -> RepoResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| RepoError::Configuration(format!("exclude pattern {:?}: {}", p, e)))
        })
        .collect()
}

/// `/`-separated path of `path` relative to `root`.
fn archive_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_excluded(excludes: &[Pattern], rel: &str, entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    excludes.iter().any(|p| p.matches(rel) || p.matches(&name))
}

fn fill_metadata(archive: &mut Archive, meta: &Metadata) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        archive.mode = meta.mode();
        archive.uid = meta.uid();
        archive.gid = meta.gid();
    }
    if let Ok(modified) = meta.modified() {
        archive.mod_time = DateTime::<Utc>::from(modified);
    }
}

struct AddRun<'a> {
    ctx: &'a StoreContext,
    opts: &'a StoreOptions,
    root: &'a Path,
    excludes: &'a [Pattern],
    progress: &'a Progress<StoreEvent>,
    /// References added so far, released again if the add fails
    added: Vec<ChunkHash>,
    /// References of replaced archives, released once the add succeeds
    replaced: Vec<ChunkHash>,
}

impl AddRun<'_> {
    #[instrument(skip_all, fields(snapshot = %snapshot.id, targets = targets.len()))]
    async fn walk(&mut self, snapshot: &mut Snapshot, targets: &[PathBuf]) -> RepoResult<()> {
        let (root, excludes) = (self.root, self.excludes);
        for target in targets {
            let walker = WalkDir::new(target)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(move |e| !is_excluded(excludes, &archive_path(root, e.path()), e));

            for entry in walker {
                self.progress.check_cancelled()?;
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e
                            .path()
                            .map(|p| archive_path(root, p))
                            .unwrap_or_else(|| archive_path(root, target));
                        self.item_failed(snapshot, path, RepoError::Io(e.into())).await;
                        continue;
                    }
                };
                let path = archive_path(root, entry.path());
                if path.is_empty() {
                    continue;
                }
                if let Some(err) = self.store_entry(snapshot, &entry, &path).await? {
                    self.item_failed(snapshot, path, err).await;
                }
            }
        }
        Ok(())
    }

    async fn item_failed(&self, snapshot: &mut Snapshot, path: String, err: RepoError) {
        warn!(path = %path, error = %err, "skipping unreadable entry");
        snapshot.stats.errors += 1;
        self.progress
            .emit(StoreEvent::ItemFailed {
                path,
                error: err.to_string(),
            })
            .await;
    }

    /// Record one entry. Source-side failures are returned as `Ok(Some(_))`;
    /// storage failures and cancellation abort the add.
    async fn store_entry(
        &mut self,
        snapshot: &mut Snapshot,
        entry: &DirEntry,
        path: &str,
    ) -> RepoResult<Option<RepoError>> {
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => return Ok(Some(RepoError::Io(e.into()))),
        };
        let file_type = entry.file_type();

        let (archive, new_chunks, reused_chunks) = if file_type.is_dir() {
            let mut archive = Archive::new(path, ArchiveType::Directory);
            fill_metadata(&mut archive, &meta);
            (archive, 0, 0)
        } else if file_type.is_symlink() {
            let target = match fs::read_link(entry.path()) {
                Ok(target) => target,
                Err(e) => return Ok(Some(e.into())),
            };
            let mut archive = Archive::new(path, ArchiveType::SymLink);
            fill_metadata(&mut archive, &meta);
            archive.points_to = Some(target.to_string_lossy().into_owned());
            (archive, 0, 0)
        } else if file_type.is_file() {
            let mut archive = Archive::new(path, ArchiveType::File);
            fill_metadata(&mut archive, &meta);
            match self.store_file(&snapshot.id, entry.path(), archive).await? {
                FileOutcome::Stored(archive, new, reused) => (archive, new, reused),
                FileOutcome::SourceFailed(e) => return Ok(Some(e)),
            }
        } else {
            debug!(path, "skipping special file");
            return Ok(None);
        };

        let event = StoreEvent::ArchiveStored {
            path: archive.path.clone(),
            archive_type: archive.archive_type,
            size: archive.size,
            storage_size: archive.storage_size,
            new_chunks,
            reused_chunks,
        };
        if let Some(old) = snapshot.add_archive(archive) {
            self.replaced.extend(old.chunk_hashes().copied());
        }
        self.progress.emit(event).await;
        Ok(None)
    }

    async fn store_file(&mut self, snapshot_id: &str, source: &Path, mut archive: Archive) -> RepoResult<FileOutcome> {
        let (tx, mut rx) = mpsc::channel::<Result<Chunk, ReduceError>>(CHUNK_CHANNEL_CAPACITY);
        let chunker = self.ctx.chunker.clone();
        let source = source.to_path_buf();
        let reader = tokio::task::spawn_blocking(move || {
            let file = match File::open(&source) {
                Ok(file) => file,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e.into()));
                    return;
                }
            };
            for chunk in chunker.stream(file) {
                let failed = chunk.is_err();
                // receiver gone: the add was cancelled or failed
                if tx.blocking_send(chunk).is_err() || failed {
                    return;
                }
            }
        });

        let mut file_refs = Vec::new();
        let (mut new_chunks, mut reused_chunks) = (0, 0);
        // Ok(None): file done, Ok(Some(_)): source unreadable, Err(_): abort
        let outcome: RepoResult<Option<RepoError>> = loop {
            if let Err(e) = self.progress.check_cancelled() {
                break Err(e);
            }
            let chunk = match rx.recv().await {
                None => break Ok(None),
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => break Ok(Some(e.into())),
            };
            match self.store_chunk(snapshot_id, chunk).await {
                Ok((descriptor, is_new)) => {
                    file_refs.push(descriptor.hash);
                    if is_new {
                        new_chunks += 1;
                        archive.storage_size += descriptor.encoded_size;
                    } else {
                        reused_chunks += 1;
                    }
                    archive.push_chunk(descriptor.chunk_ref());
                }
                Err(e) => break Err(e),
            }
        };
        drop(rx);
        reader.await?;

        match outcome {
            Ok(None) => {
                self.added.extend(file_refs);
                Ok(FileOutcome::Stored(archive, new_chunks, reused_chunks))
            }
            Ok(Some(source_err)) => {
                for hash in &file_refs {
                    self.ctx.index.release_reference(hash, snapshot_id);
                }
                Ok(FileOutcome::SourceFailed(source_err))
            }
            Err(e) => {
                self.added.extend(file_refs);
                Err(e)
            }
        }
    }

    async fn store_chunk(&self, snapshot_id: &str, chunk: Chunk) -> RepoResult<(ChunkDescriptor, bool)> {
        let backends = &self.ctx.backends;
        let pipeline = Arc::clone(&self.ctx.pipeline);
        let (compression, encryption) = (self.opts.compression, self.opts.encryption);
        let tolerance = self.opts.failure_tolerance;
        let hash = chunk.hash;

        self.ctx
            .index
            .store_chunk(hash, snapshot_id, || async move {
                let data = chunk.data;
                let encoded = tokio::task::spawn_blocking(move || {
                    pipeline.encode(&data, &hash, compression, encryption)
                })
                .await??;
                let stored = backends.write_chunk(&hash.to_hex(), &encoded.payload, tolerance).await?;
                debug!(hash = %hash.short(), encoded = encoded.payload.len(), "chunk written");
                Ok::<_, RepoError>(ChunkDescriptor::new(
                    hash,
                    encoded.plain_size,
                    encoded.payload.len() as u64,
                    encoded.codec,
                    stored,
                ))
            })
            .await
    }
}
