//! Local filesystem backend (`file:///path`).

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use walkdir::WalkDir;

use crate::backend::Backend;
use crate::error::{StorageError, StorageResult};

/// Directories created by `init_repository`.
const LAYOUT_DIRS: [&str; 2] = ["chunks", "snapshots"];

/// Backend rooted at a local directory. Blocking filesystem work runs on
/// tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    url: String,
}

impl LocalBackend {
    /// Create a backend rooted at `root`; `url` is reported as its location.
    pub fn new(root: impl Into<PathBuf>, url: &str) -> Self {
        Self {
            root: root.into(),
            url: url.to_string(),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject keys that could escape the repository root.
    fn validate_key(key: &str) -> StorageResult<()> {
        let unsafe_key = |why: &str| StorageError::InvalidUrl(format!("unsafe storage key '{key}': {why}"));
        if key.is_empty() {
            return Err(unsafe_key("empty"));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(unsafe_key("absolute or backslash"));
        }
        if Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(unsafe_key("parent or special component"));
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn io_error(&self, e: std::io::Error) -> StorageError {
        StorageError::backend(&self.url, e)
    }

    /// Write to a temp file next to the target, then rename into place, so
    /// readers never see a partial file.
    fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| std::io::Error::other("key has no parent directory"))?;
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StorageResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| StorageError::backend(&self.url, format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        let path = self.resolve(key)?;
        let this = self.clone();
        self.blocking(move || Self::atomic_write(&path, &data).map_err(|e| this.io_error(e)))
            .await
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve(key)?;
        let this = self.clone();
        let key = key.to_string();
        self.blocking(move || match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound { key }),
            Err(e) => Err(this.io_error(e)),
        })
        .await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        let this = self.clone();
        self.blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(this.io_error(e)),
        })
        .await
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        let this = self.clone();
        self.blocking(move || {
            if !this.root.is_dir() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&this.root).min_depth(1) {
                let entry = entry.map_err(|e| StorageError::backend(&this.url, e))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                // In-flight temp files from atomic_write
                if name.starts_with(".tmp") {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(&this.root) {
                    let key: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    keys.push(key.join("/"));
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
    }

    async fn available_space(&self) -> StorageResult<u64> {
        let this = self.clone();
        self.blocking(move || {
            free_space(&this.root).map_err(|e| this.io_error(e))
        })
        .await
    }

    fn location(&self) -> String {
        self.url.clone()
    }

    fn protocols(&self) -> Vec<&'static str> {
        vec!["file"]
    }

    async fn init_repository(&self) -> StorageResult<()> {
        let this = self.clone();
        self.blocking(move || {
            for dir in LAYOUT_DIRS {
                fs::create_dir_all(this.root.join(dir)).map_err(|e| this.io_error(e))?;
            }
            debug!(root = %this.root.display(), "initialized local repository layout");
            Ok(())
        })
        .await
    }
}

/// Bytes available to unprivileged writers on the filesystem holding `root`.
#[cfg(unix)]
fn free_space(root: &Path) -> std::io::Result<u64> {
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let path = std::ffi::CString::new(root.as_os_str().as_bytes())
        .map_err(std::io::Error::other)?;
    let mut fs_stat = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `path` is NUL-terminated; statvfs fills `fs_stat` on success.
    let fs_stat = unsafe {
        if libc::statvfs(path.as_ptr(), fs_stat.as_mut_ptr()) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        fs_stat.assume_init()
    };
    #[allow(clippy::unnecessary_cast)]
    let (blocks, block_size) = (fs_stat.f_bavail as u64, fs_stat.f_frsize as u64);
    blocks
        .checked_mul(block_size)
        .ok_or_else(|| std::io::Error::other("free space overflows u64"))
}

#[cfg(not(unix))]
fn free_space(_root: &Path) -> std::io::Result<u64> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "free space query not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> LocalBackend {
        LocalBackend::new(dir.path(), &format!("file://{}", dir.path().display()))
    }

    #[tokio::test]
    async fn put_get_delete() {
        let dir = TempDir::new().unwrap();
        let b = backend(&dir);
        b.init_repository().await.unwrap();
        b.put("chunks/ab.0", b"piece".to_vec()).await.unwrap();
        assert_eq!(b.get("chunks/ab.0").await.unwrap(), b"piece");
        b.delete("chunks/ab.0").await.unwrap();
        assert!(matches!(
            b.get("chunks/ab.0").await,
            Err(StorageError::NotFound { .. })
        ));
        b.delete("chunks/ab.0").await.unwrap();
    }

    #[tokio::test]
    async fn put_creates_parents_and_replaces() {
        let dir = TempDir::new().unwrap();
        let b = backend(&dir);
        b.put("snapshots/deadbeef", b"one".to_vec()).await.unwrap();
        b.put("snapshots/deadbeef", b"two".to_vec()).await.unwrap();
        assert_eq!(b.get("snapshots/deadbeef").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn list_returns_relative_keys() {
        let dir = TempDir::new().unwrap();
        let b = backend(&dir);
        b.init_repository().await.unwrap();
        b.init_repository().await.unwrap();
        b.put("repository", vec![1]).await.unwrap();
        b.put("chunks/ff.1", vec![2]).await.unwrap();
        assert_eq!(b.list().await.unwrap(), vec!["chunks/ff.1", "repository"]);
    }

    #[tokio::test]
    async fn unsafe_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let b = backend(&dir);
        assert!(b.put("../escape", vec![]).await.is_err());
        assert!(b.put("/abs", vec![]).await.is_err());
        assert!(b.get("").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_free_space() {
        let dir = TempDir::new().unwrap();
        let b = backend(&dir);
        assert!(b.available_space().await.unwrap() > 0);
        assert_eq!(b.protocols(), vec!["file"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn free_space_of_missing_root_is_a_backend_error() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("never-created");
        let b = LocalBackend::new(&gone, "file:///never-created");
        assert!(matches!(
            b.available_space().await,
            Err(StorageError::Backend { .. })
        ));
    }
}
