//! Backend capability trait and URL-scheme registry.
//!
//! A backend is any store that can put, get, delete and list opaque blobs by
//! key. Concrete implementations are selected by the scheme of their URL
//! (`file:///srv/backup`, `mem://scratch`).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::local_backend::LocalBackend;
use crate::mem_backend::MemoryBackend;

/// Storage capability every backend must provide.
///
/// Keys are `/`-separated relative paths. `put` replaces atomically: a
/// concurrent `get` sees either the old or the new value, never a mix.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Store `data` under `key`, replacing any previous value.
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()>;

    /// Fetch the value under `key`; `StorageError::NotFound` if absent.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// All keys currently stored, sorted.
    async fn list(&self) -> StorageResult<Vec<String>>;

    /// Free bytes the backend can still accept.
    async fn available_space(&self) -> StorageResult<u64>;

    /// URL this backend was opened from.
    fn location(&self) -> String;

    /// URL schemes served by this implementation.
    fn protocols(&self) -> Vec<&'static str>;

    /// Prepare an empty repository layout. Calling it again is a no-op.
    async fn init_repository(&self) -> StorageResult<()>;
}

impl fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backend({})", self.location())
    }
}

/// A parsed backend URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUrl {
    /// Lowercased scheme, `file` when the URL is a bare path
    pub scheme: String,
    /// Everything after `scheme://`
    pub path: String,
    /// The URL exactly as given
    pub raw: String,
}

impl BackendUrl {
    /// Split `scheme://path`. A string without `://` is a local path.
    pub fn parse(url: &str) -> StorageResult<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(StorageError::InvalidUrl("empty URL".to_string()));
        }
        let (scheme, path) = match url.split_once("://") {
            Some((scheme, path)) => (scheme.to_ascii_lowercase(), path.to_string()),
            None => ("file".to_string(), url.to_string()),
        };
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(StorageError::InvalidUrl(url.to_string()));
        }
        if path.is_empty() {
            return Err(StorageError::InvalidUrl(format!("{url}: missing path")));
        }
        Ok(Self {
            scheme,
            path,
            raw: url.to_string(),
        })
    }
}

type BackendFactory = Arc<dyn Fn(&BackendUrl) -> StorageResult<Arc<dyn Backend>> + Send + Sync>;

/// Maps URL schemes to backend constructors.
///
/// `BackendRegistry::default()` serves `file://` and `mem://`. In-memory
/// backends are shared by name within one registry, so opening `mem://a`
/// twice yields the same store.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
    memory: Arc<Mutex<HashMap<String, Arc<MemoryBackend>>>>,
}

impl BackendRegistry {
    /// A registry with no schemes at all.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            memory: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register (or replace) the constructor for `scheme`.
    pub fn register<F>(&mut self, scheme: &str, factory: F)
    where
        F: Fn(&BackendUrl) -> StorageResult<Arc<dyn Backend>> + Send + Sync + 'static,
    {
        self.factories
            .insert(scheme.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Schemes this registry can resolve, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.factories.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Resolve a URL to a backend instance.
    pub fn resolve(&self, url: &str) -> StorageResult<Arc<dyn Backend>> {
        let parsed = BackendUrl::parse(url)?;
        let factory = self
            .factories
            .get(&parsed.scheme)
            .ok_or_else(|| StorageError::UnsupportedScheme(parsed.scheme.clone()))?;
        debug!(url = %parsed.raw, scheme = %parsed.scheme, "resolving backend");
        factory(&parsed)
    }

    /// The shared in-memory backend named `name`, if one was opened.
    pub fn memory_backend(&self, name: &str) -> Option<Arc<MemoryBackend>> {
        self.memory.lock().get(name).cloned()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("file", |url| {
            Ok(Arc::new(LocalBackend::new(&url.path, &url.raw)) as Arc<dyn Backend>)
        });
        let memory = Arc::clone(&registry.memory);
        registry.register("mem", move |url| {
            let backend = memory
                .lock()
                .entry(url.path.clone())
                .or_insert_with(|| Arc::new(MemoryBackend::new(&url.path)))
                .clone();
            Ok(backend as Arc<dyn Backend>)
        });
        registry
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
