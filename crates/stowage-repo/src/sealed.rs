//! Encrypted metadata blobs: bincode inside AES-256-GCM.

use serde::de::DeserializeOwned;
use serde::Serialize;
use stowage_reduce::encryption::{seal, unseal};
use stowage_reduce::EncryptionKey;
use stowage_storage::BackendManager;

use crate::error::RepoResult;

/// Serialize and encrypt `value`.
pub fn seal_value<T: Serialize>(value: &T, key: &EncryptionKey) -> RepoResult<Vec<u8>> {
    let plain = bincode::serialize(value)?;
    Ok(seal(&plain, key)?)
}

/// Decrypt and deserialize a blob produced by [`seal_value`].
pub fn open_value<T: DeserializeOwned>(sealed: &[u8], key: &EncryptionKey) -> RepoResult<T> {
    let plain = unseal(sealed, key)?;
    Ok(bincode::deserialize(&plain)?)
}

/// Seal `value` and replicate it to every backend under `name`.
pub async fn put_sealed<T: Serialize>(
    backends: &BackendManager,
    name: &str,
    value: &T,
    key: &EncryptionKey,
) -> RepoResult<()> {
    let blob = seal_value(value, key)?;
    backends.put_metadata(name, &blob).await?;
    Ok(())
}

/// Fetch `name` from the first backend holding it and open it.
pub async fn get_sealed<T: DeserializeOwned>(
    backends: &BackendManager,
    name: &str,
    key: &EncryptionKey,
) -> RepoResult<T> {
    let blob = backends.get_metadata(name).await?;
    open_value(&blob, key)
}
