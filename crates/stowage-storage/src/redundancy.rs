//! Piece redundancy: split a chunk into M pieces so that any M−F rebuild it.
//!
//! With F > 0 the pieces are a Reed–Solomon code over GF(2^8): M−F data
//! shards plus F parity shards. With F = 0 there is nothing to survive, so the
//! chunk is simply striped into M data shards (M = 1 is plain storage).

use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{StorageError, StorageResult};

/// Largest piece count GF(2^8) Reed–Solomon supports.
pub const MAX_PIECES: usize = 256;

/// How one chunk is spread over pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RedundancyLayout {
    /// Pieces written (M)
    pub total: usize,
    /// Pieces needed to reconstruct (M − F)
    pub required: usize,
}

impl RedundancyLayout {
    /// Layout for `backends` pieces surviving `tolerance` losses.
    pub fn new(backends: usize, tolerance: usize) -> StorageResult<Self> {
        if backends == 0 {
            return Err(StorageError::Configuration("no backends configured".to_string()));
        }
        if tolerance >= backends {
            return Err(StorageError::Configuration(format!(
                "failure tolerance {} must be smaller than the backend count {}",
                tolerance, backends
            )));
        }
        if backends > MAX_PIECES {
            return Err(StorageError::Configuration(format!(
                "at most {} backends are supported, got {}",
                MAX_PIECES, backends
            )));
        }
        Ok(Self {
            total: backends,
            required: backends - tolerance,
        })
    }

    /// Losses this layout survives (F)
    pub fn tolerance(&self) -> usize {
        self.total - self.required
    }

    /// Size of every piece for a chunk of `len` bytes.
    pub fn piece_size(&self, len: usize) -> usize {
        len.div_ceil(self.required).max(1)
    }

    fn coder(&self) -> StorageResult<Option<ReedSolomon>> {
        if self.tolerance() == 0 {
            return Ok(None);
        }
        ReedSolomon::new(self.required, self.tolerance())
            .map(Some)
            .map_err(|e| StorageError::Encoding(format!("{:?}", e)))
    }

    /// Split `data` into `total` equally sized pieces.
    pub fn encode(&self, data: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        let size = self.piece_size(data.len());
        let mut pieces: Vec<Vec<u8>> = (0..self.total)
            .map(|i| {
                let mut piece = vec![0u8; size];
                if i < self.required {
                    let start = (i * size).min(data.len());
                    let end = (start + size).min(data.len());
                    piece[..end - start].copy_from_slice(&data[start..end]);
                }
                piece
            })
            .collect();
        if let Some(rs) = self.coder()? {
            rs.encode(&mut pieces)
                .map_err(|e| StorageError::Encoding(format!("{:?}", e)))?;
        }
        trace!(len = data.len(), piece_size = size, total = self.total, "encoded pieces");
        Ok(pieces)
    }

    /// Rebuild the original `len` bytes from whatever pieces arrived.
    ///
    /// `pieces[i]` is piece `i` or `None` if it could not be fetched. Pieces of
    /// the wrong size are treated as missing.
    pub fn decode(&self, mut pieces: Vec<Option<Vec<u8>>>, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.piece_size(len);
        pieces.resize(self.total, None);
        for piece in pieces.iter_mut() {
            if piece.as_ref().is_some_and(|p| p.len() != size) {
                *piece = None;
            }
        }
        let available = pieces.iter().filter(|p| p.is_some()).count();
        let data_present = pieces[..self.required].iter().all(|p| p.is_some());
        if !data_present {
            if available < self.required {
                return Err(StorageError::Redundancy {
                    needed: self.required,
                    available,
                });
            }
            match self.coder()? {
                Some(rs) => rs
                    .reconstruct_data(&mut pieces)
                    .map_err(|e| StorageError::Encoding(format!("{:?}", e)))?,
                None => {
                    return Err(StorageError::Redundancy {
                        needed: self.required,
                        available,
                    })
                }
            }
        }

        let mut out = Vec::with_capacity(size * self.required);
        for piece in pieces.into_iter().take(self.required) {
            match piece {
                Some(p) => out.extend_from_slice(&p),
                None => {
                    return Err(StorageError::Redundancy {
                        needed: self.required,
                        available,
                    })
                }
            }
        }
        out.truncate(len);
        Ok(out)
    }
}
