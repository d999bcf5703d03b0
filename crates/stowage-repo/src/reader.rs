//! Reconstruction of archive content, whole or by byte range.

use std::sync::Arc;

use stowage_reduce::{blake3_hash, ReduceError, ReductionPipeline};
use stowage_storage::BackendManager;
use tracing::{debug, instrument, trace};

use crate::archive::{Archive, ChunkRef};
use crate::error::{RepoError, RepoResult};

/// Decodes chunks straight from the backends. The chunk index is not
/// needed: every [`ChunkRef`] carries its layout and codec.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    backends: Arc<BackendManager>,
    pipeline: Arc<ReductionPipeline>,
}

impl ArchiveReader {
    /// Reader over `backends` using the repository's chunk codec.
    pub fn new(backends: Arc<BackendManager>, pipeline: Arc<ReductionPipeline>) -> Self {
        Self { backends, pipeline }
    }

    /// Fetch, rebuild and decode one chunk, checking it against its hash.
    ///
    /// Too few reachable pieces fail with `Redundancy`; pieces that rebuild
    /// into something that does not decrypt, decompress or hash back to the
    /// chunk fail with `Corruption`.
    pub async fn decode_chunk(&self, chunk: &ChunkRef) -> RepoResult<Vec<u8>> {
        let hex = chunk.hash.to_hex();
        let locations = self.backends.chunk_locations(&hex, chunk.layout.total);
        let payload = self
            .backends
            .read_chunk(chunk.layout, &locations, chunk.encoded_size as usize)
            .await?;

        let corrupt = || RepoError::Corruption { hash: hex.clone() };
        let plain = match self.pipeline.decode(&payload, &chunk.hash, chunk.codec) {
            Ok(plain) => plain,
            Err(ReduceError::DecryptionAuthFailed | ReduceError::DecompressionFailed(_)) => {
                debug!(hash = %chunk.hash.short(), "chunk payload failed to decode");
                return Err(corrupt());
            }
            Err(e) => return Err(e.into()),
        };
        if plain.len() as u64 != chunk.plain_size || blake3_hash(&plain) != chunk.hash {
            debug!(hash = %chunk.hash.short(), "chunk hash mismatch");
            return Err(corrupt());
        }
        trace!(hash = %chunk.hash.short(), len = plain.len(), "chunk decoded");
        Ok(plain)
    }

    /// Full content of `archive`; empty for directories and symlinks.
    #[instrument(skip(self, archive), fields(path = %archive.path, size = archive.size))]
    pub async fn decode_archive_data(&self, archive: &Archive) -> RepoResult<Vec<u8>> {
        let mut out = Vec::with_capacity(archive.size as usize);
        if !archive.is_file() {
            return Ok(out);
        }
        for chunk in &archive.chunks {
            out.extend_from_slice(&self.decode_chunk(chunk).await?);
        }
        Ok(out)
    }

    /// Up to `size` bytes starting at `offset`. Only chunks overlapping the
    /// range are fetched. Reads starting at or past the end fail with
    /// `EndOfArchive`; reads running past it are cut short.
    pub async fn read_archive(&self, archive: &Archive, offset: u64, size: u64) -> RepoResult<Vec<u8>> {
        if offset >= archive.size {
            return Err(RepoError::EndOfArchive);
        }
        let end = offset.saturating_add(size).min(archive.size);
        let range = archive.chunk_range(offset, end);
        let offsets = archive.chunk_offsets();

        let mut out = Vec::with_capacity((end - offset) as usize);
        for i in range {
            let chunk_start = offsets[i];
            let data = self.decode_chunk(&archive.chunks[i]).await?;
            let from = offset.saturating_sub(chunk_start) as usize;
            let to = ((end - chunk_start) as usize).min(data.len());
            out.extend_from_slice(&data[from..to]);
        }
        Ok(out)
    }
}
