//! Engine configuration: chunker sizes, store/verify defaults, KDF cost.

use std::path::Path;

use serde::{Deserialize, Serialize};
use stowage_reduce::{ChunkerConfig, CompressionAlgorithm, EncryptionAlgorithm, KdfCost};

use crate::error::{RepoError, RepoResult};

/// Default bounded capacity of progress streams
pub const DEFAULT_PROGRESS_CAPACITY: usize = 64;

/// Default share of archives checked by verify
pub const DEFAULT_VERIFY_PERCENTAGE: u8 = 70;

/// Per-call options for adding data to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Snapshot description
    pub description: String,
    /// Compression for chunks written by this call
    pub compression: CompressionAlgorithm,
    /// Encryption for chunks written by this call
    pub encryption: EncryptionAlgorithm,
    /// Backend losses every new chunk must survive (F)
    pub failure_tolerance: usize,
    /// Glob patterns; matching paths (relative or file name) are skipped
    pub excludes: Vec<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            description: String::new(),
            compression: CompressionAlgorithm::None,
            encryption: EncryptionAlgorithm::AesGcm256,
            failure_tolerance: 0,
            excludes: Vec::new(),
        }
    }
}

/// Options for a verify pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyOptions {
    /// Share of archives to check, 0–100
    pub percentage: u8,
    /// Sampling seed; the same seed over the same archives picks the same sample
    pub seed: u64,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            percentage: DEFAULT_VERIFY_PERCENTAGE,
            seed: 0,
        }
    }
}

/// All tunables of the engine, passed explicitly to the operations that need them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Content-defined chunk sizes
    pub chunker: ChunkerConfig,
    /// Defaults for store calls
    pub store: StoreOptions,
    /// Defaults for verify calls
    pub verify: VerifyOptions,
    /// Argon2id cost for new repositories and password changes
    pub kdf: KdfCost,
    /// Capacity of bounded progress streams
    pub progress_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            store: StoreOptions::default(),
            verify: VerifyOptions::default(),
            kdf: KdfCost::default(),
            progress_capacity: DEFAULT_PROGRESS_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> RepoResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config = match ext.to_lowercase().as_str() {
            "toml" => Self::from_toml_str(&contents)?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| RepoError::Configuration(format!("{}: {}", path.display(), e)))?,
            other => {
                return Err(RepoError::Configuration(format!(
                    "unsupported config format {:?}",
                    other
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text and validate it.
    pub fn from_toml_str(contents: &str) -> RepoResult<Self> {
        let config: EngineConfig =
            toml::from_str(contents).map_err(|e| RepoError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no operation could run with.
    pub fn validate(&self) -> RepoResult<()> {
        self.chunker.validate()?;
        if self.verify.percentage > 100 {
            return Err(RepoError::Configuration(format!(
                "verify percentage {} is above 100",
                self.verify.percentage
            )));
        }
        if self.progress_capacity == 0 {
            return Err(RepoError::Configuration(
                "progress capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
