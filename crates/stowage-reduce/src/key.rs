//! Password-based wrapping of the repository master key (Argon2id + AES-256-GCM)

use crate::encryption::{EncryptionKey, NONCE_LEN};
use crate::error::ReduceError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use argon2::Argon2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

/// Argon2id cost settings used when a new repository (or password) is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfCost {
    /// Iterations
    pub time_cost: u32,
    /// Memory in KiB
    pub memory_cost: u32,
    /// Lanes
    pub parallelism: u32,
}

impl Default for KdfCost {
    fn default() -> Self {
        Self {
            time_cost: 3,
            memory_cost: 65536, // 64 MiB
            parallelism: 4,
        }
    }
}

impl KdfCost {
    /// Minimal cost, for tests and throwaway repositories only.
    pub fn insecure_fast() -> Self {
        Self {
            time_cost: 1,
            memory_cost: 64,
            parallelism: 1,
        }
    }
}

/// KDF parameters stored alongside the wrapped key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Always `"argon2id"` for repositories written by this crate
    pub algorithm: String,
    /// Iterations
    pub time_cost: u32,
    /// Memory in KiB
    pub memory_cost: u32,
    /// Lanes
    pub parallelism: u32,
    /// Random per-password salt
    pub salt: Vec<u8>,
}

impl KdfParams {
    /// Fresh parameters with a random salt.
    pub fn generate(cost: KdfCost) -> Self {
        let mut salt = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            algorithm: "argon2id".to_string(),
            time_cost: cost.time_cost,
            memory_cost: cost.memory_cost,
            parallelism: cost.parallelism,
            salt,
        }
    }

    /// The cost part of these parameters
    pub fn cost(&self) -> KdfCost {
        KdfCost {
            time_cost: self.time_cost,
            memory_cost: self.memory_cost,
            parallelism: self.parallelism,
        }
    }
}

/// Master key encrypted under a password-derived key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKey {
    /// How the wrapping key is derived from the password
    pub kdf: KdfParams,
    /// AES-GCM nonce
    pub nonce: [u8; NONCE_LEN],
    /// Encrypted master key with authentication tag
    pub ciphertext: Vec<u8>,
}

/// Encrypt the master key with a password.
///
/// The serialized KDF parameters are bound as AAD, so a blob whose parameters
/// were swapped fails to unwrap.
pub fn wrap_master_key(
    master: &EncryptionKey,
    password: &str,
    cost: KdfCost,
) -> Result<WrappedKey, ReduceError> {
    let kdf = KdfParams::generate(cost);
    let wrapping_key = derive_key_from_password(password, &kdf)?;
    let aad = kdf_params_aad(&kdf)?;

    let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
        .map_err(|e| ReduceError::KeyDerivation(format!("cipher init: {e}")))?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(
            aes_gcm::Nonce::from_slice(&nonce),
            Payload {
                msg: &master.0,
                aad: &aad,
            },
        )
        .map_err(|e| ReduceError::EncryptionFailed(e.to_string()))?;

    debug!(time_cost = kdf.time_cost, memory_cost = kdf.memory_cost, "wrapped master key");
    Ok(WrappedKey {
        kdf,
        nonce,
        ciphertext,
    })
}

/// Recover the master key. A wrong password yields `DecryptionAuthFailed`.
pub fn unwrap_master_key(wrapped: &WrappedKey, password: &str) -> Result<EncryptionKey, ReduceError> {
    if wrapped.kdf.algorithm != "argon2id" {
        return Err(ReduceError::UnsupportedAlgorithm(format!(
            "kdf {:?}",
            wrapped.kdf.algorithm
        )));
    }
    let wrapping_key = derive_key_from_password(password, &wrapped.kdf)?;
    let aad = kdf_params_aad(&wrapped.kdf)?;

    let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
        .map_err(|_| ReduceError::DecryptionAuthFailed)?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                aes_gcm::Nonce::from_slice(&wrapped.nonce),
                Payload {
                    msg: wrapped.ciphertext.as_ref(),
                    aad: &aad,
                },
            )
            .map_err(|_| ReduceError::DecryptionAuthFailed)?,
    );
    if plaintext.len() != 32 {
        return Err(ReduceError::DecryptionAuthFailed);
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&plaintext);
    Ok(EncryptionKey(key))
}

fn kdf_params_aad(kdf: &KdfParams) -> Result<Vec<u8>, ReduceError> {
    bincode::serialize(kdf).map_err(|e| ReduceError::KeyDerivation(format!("serialize kdf aad: {e}")))
}

fn derive_key_from_password(
    password: &str,
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, ReduceError> {
    let params = argon2::Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(32))
        .map_err(|e| ReduceError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), &kdf.salt, output.as_mut())
        .map_err(|e| ReduceError::KeyDerivation(format!("argon2 hash: {e}")))?;
    Ok(output)
}
