//! In-memory backend (`mem://name`).
//!
//! Used for tests and throwaway repositories. It can be switched offline to
//! simulate an unreachable backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::Backend;
use crate::error::{StorageError, StorageResult};

/// Default advertised capacity of an in-memory backend (1 TiB).
pub const DEFAULT_MEMORY_CAPACITY: u64 = 1 << 40;

/// Operation counters for a memory backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBackendStats {
    /// Number of successful put operations.
    pub puts: u64,
    /// Number of get operations.
    pub gets: u64,
    /// Number of delete operations.
    pub deletes: u64,
    /// Number of list operations.
    pub list_calls: u64,
    /// Total bytes currently stored.
    pub total_bytes_stored: u64,
}

/// Map-backed object store.
pub struct MemoryBackend {
    name: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    stats: Mutex<MemoryBackendStats>,
    online: AtomicBool,
    capacity: u64,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new(name: &str) -> Self {
        Self::with_capacity(name, DEFAULT_MEMORY_CAPACITY)
    }

    /// Create an empty store advertising `capacity` bytes.
    pub fn with_capacity(name: &str, capacity: u64) -> Self {
        Self {
            name: name.to_string(),
            objects: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(MemoryBackendStats::default()),
            online: AtomicBool::new(true),
            capacity,
        }
    }

    /// Take the backend offline (`false`) or bring it back (`true`).
    /// While offline every operation fails with `StorageError::Unavailable`.
    pub fn set_available(&self, online: bool) {
        debug!(backend = %self.name, online, "memory backend availability changed");
        self.online.store(online, Ordering::SeqCst);
    }

    /// Whether the backend currently answers requests.
    pub fn is_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Get statistics about store operations.
    pub fn stats(&self) -> MemoryBackendStats {
        self.stats.lock().clone()
    }

    /// Number of stored objects.
    pub fn stored_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Number of stored objects whose key starts with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.objects
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    /// Overwrite a stored object in place without touching the counters.
    /// Returns false if the key is absent.
    pub fn tamper(&self, key: &str, f: impl FnOnce(&mut Vec<u8>)) -> bool {
        match self.objects.lock().get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StorageError::Unavailable {
                location: self.location(),
            })
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        self.check_online()?;
        let bytes = data.len() as u64;
        let previous = self.objects.lock().insert(key.to_string(), data);
        let replaced = previous.map(|d| d.len() as u64).unwrap_or(0);

        let mut stats = self.stats.lock();
        stats.puts += 1;
        stats.total_bytes_stored = stats
            .total_bytes_stored
            .saturating_sub(replaced)
            .saturating_add(bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.check_online()?;
        let result = self.objects.lock().get(key).cloned();
        self.stats.lock().gets += 1;
        result.ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.check_online()?;
        let removed = self.objects.lock().remove(key);
        let bytes_removed = removed.map(|d| d.len() as u64).unwrap_or(0);

        let mut stats = self.stats.lock();
        stats.deletes += 1;
        stats.total_bytes_stored = stats.total_bytes_stored.saturating_sub(bytes_removed);
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        self.check_online()?;
        let keys: Vec<String> = self.objects.lock().keys().cloned().collect();
        self.stats.lock().list_calls += 1;
        Ok(keys)
    }

    async fn available_space(&self) -> StorageResult<u64> {
        self.check_online()?;
        Ok(self
            .capacity
            .saturating_sub(self.stats.lock().total_bytes_stored))
    }

    fn location(&self) -> String {
        format!("mem://{}", self.name)
    }

    fn protocols(&self) -> Vec<&'static str> {
        vec!["mem"]
    }

    async fn init_repository(&self) -> StorageResult<()> {
        self.check_online()
    }
}
