//! Archive: one filesystem entry of a snapshot and the chunks holding its content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowage_reduce::{ChunkHash, Codec};
use stowage_storage::RedundancyLayout;

use crate::stats::Stats;

/// Kind of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveType {
    /// Regular file; content lives in chunks
    File,
    /// Directory; no content
    Directory,
    /// Symbolic link; target kept in `points_to`
    SymLink,
}

/// Everything needed to fetch and decode one chunk without the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// BLAKE3 hash of the plaintext
    pub hash: ChunkHash,
    /// Plaintext bytes
    pub plain_size: u64,
    /// Bytes after compression and encryption
    pub encoded_size: u64,
    /// Piece layout; piece `i` lives on backend `i`
    pub layout: RedundancyLayout,
    /// Algorithms the chunk was encoded with when first stored
    pub codec: Codec,
}

/// One filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    /// Path relative to the store root (`/`-separated)
    pub path: String,
    /// Permission bits
    pub mode: u32,
    /// Owner user id
    pub uid: u32,
    /// Owner group id
    pub gid: u32,
    /// Logical size; for files the sum of the chunks' plaintext sizes
    pub size: u64,
    /// Last modification time
    pub mod_time: DateTime<Utc>,
    /// Entry kind
    pub archive_type: ArchiveType,
    /// Symlink target
    pub points_to: Option<String>,
    /// File content, in order
    pub chunks: Vec<ChunkRef>,
    /// Encoded bytes of chunks this archive wrote for the first time
    pub storage_size: u64,
}

impl Archive {
    /// Entry without content, for directories and as a starting point for files.
    pub fn new(path: impl Into<String>, archive_type: ArchiveType) -> Self {
        Self {
            path: path.into(),
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            mod_time: Utc::now(),
            archive_type,
            points_to: None,
            chunks: Vec::new(),
            storage_size: 0,
        }
    }

    /// Regular file entry
    pub fn is_file(&self) -> bool {
        self.archive_type == ArchiveType::File
    }

    /// Chunk hashes in content order
    pub fn chunk_hashes(&self) -> impl Iterator<Item = &ChunkHash> + '_ {
        self.chunks.iter().map(|c| &c.hash)
    }

    /// Append a chunk and grow the logical size.
    pub fn push_chunk(&mut self, chunk: ChunkRef) {
        self.size += chunk.plain_size;
        self.chunks.push(chunk);
    }

    /// Start offset of every chunk plus the total size as the last element.
    pub fn chunk_offsets(&self) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(self.chunks.len() + 1);
        let mut pos = 0u64;
        offsets.push(pos);
        for chunk in &self.chunks {
            pos += chunk.plain_size;
            offsets.push(pos);
        }
        offsets
    }

    /// Indices of the chunks overlapping `[start, end)`.
    pub fn chunk_range(&self, start: u64, end: u64) -> std::ops::Range<usize> {
        if start >= end {
            return 0..0;
        }
        let offsets = self.chunk_offsets();
        // first chunk whose end is past `start`
        let first = offsets[1..].partition_point(|&chunk_end| chunk_end <= start);
        // first chunk that starts at or after `end`
        let last = offsets[..offsets.len() - 1].partition_point(|&chunk_start| chunk_start < end);
        first..last.max(first)
    }

    /// This entry's contribution to snapshot statistics.
    pub fn stats(&self) -> Stats {
        let mut stats = Stats {
            storage_size: self.storage_size,
            ..Stats::default()
        };
        match self.archive_type {
            ArchiveType::File => {
                stats.files = 1;
                stats.size = self.size;
            }
            ArchiveType::Directory => stats.dirs = 1,
            ArchiveType::SymLink => stats.symlinks = 1,
        }
        stats
    }
}
