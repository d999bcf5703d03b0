//! AES-256-GCM and ChaCha20-Poly1305 AEAD encryption with HKDF key derivation

use crate::error::ReduceError;
use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the AEAD nonce prepended to serialized ciphertexts
pub const NONCE_LEN: usize = 12;

/// 256-bit (32-byte) encryption key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

impl EncryptionKey {
    /// Generate a fresh key from OS entropy
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        EncryptionKey(bytes)
    }
}

/// 96-bit (12-byte) nonce for AEAD ciphers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce(pub [u8; NONCE_LEN]);

/// Cipher selection, persisted by identifier like the compression algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum EncryptionAlgorithm {
    /// Plaintext passthrough
    None,
    /// AES-256-GCM — hardware accelerated on x86 with AES-NI
    #[default]
    AesGcm256,
    /// ChaCha20-Poly1305 — constant-time, fast on non-AES hardware
    ChaCha20Poly1305,
}

impl std::fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = match self {
            EncryptionAlgorithm::None => "none",
            EncryptionAlgorithm::AesGcm256 => "aes",
            EncryptionAlgorithm::ChaCha20Poly1305 => "chacha20",
        };
        f.write_str(id)
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = ReduceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(EncryptionAlgorithm::None),
            "" | "aes" | "aes-gcm" => Ok(EncryptionAlgorithm::AesGcm256),
            "chacha20" | "chacha20-poly1305" => Ok(EncryptionAlgorithm::ChaCha20Poly1305),
            _ => Err(ReduceError::UnsupportedAlgorithm(format!("encryption {:?}", s))),
        }
    }
}

impl TryFrom<String> for EncryptionAlgorithm {
    type Error = ReduceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EncryptionAlgorithm> for String {
    fn from(algo: EncryptionAlgorithm) -> Self {
        algo.to_string()
    }
}

/// Encrypted chunk: ciphertext (with 16-byte auth tag), nonce, algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedChunk {
    /// Ciphertext with 16-byte AEAD authentication tag appended
    pub ciphertext: Vec<u8>,
    /// Nonce used for this encryption operation
    pub nonce: Nonce,
    /// Algorithm (needed for decryption)
    pub algo: EncryptionAlgorithm,
}

impl EncryptedChunk {
    /// Wire form: nonce followed by ciphertext. Plaintext chunks carry no nonce.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.algo == EncryptionAlgorithm::None {
            return self.ciphertext.clone();
        }
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce.0);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the wire form produced by [`EncryptedChunk::to_bytes`].
    pub fn from_bytes(bytes: &[u8], algo: EncryptionAlgorithm) -> Result<Self, ReduceError> {
        if algo == EncryptionAlgorithm::None {
            return Ok(EncryptedChunk {
                ciphertext: bytes.to_vec(),
                nonce: Nonce([0u8; NONCE_LEN]),
                algo,
            });
        }
        if bytes.len() < NONCE_LEN {
            return Err(ReduceError::DecryptionAuthFailed);
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        Ok(EncryptedChunk {
            ciphertext: bytes[NONCE_LEN..].to_vec(),
            nonce: Nonce(nonce),
            algo,
        })
    }
}

/// Derive a per-chunk key from master key + chunk hash using HKDF-SHA256
pub fn derive_chunk_key(master_key: &EncryptionKey, chunk_hash: &[u8; 32]) -> EncryptionKey {
    derive_subkey(master_key, b"stowage-chunk-key", chunk_hash)
}

/// Derive a purpose-bound subkey from the master key using HKDF-SHA256
pub fn derive_subkey(master_key: &EncryptionKey, label: &[u8], context: &[u8]) -> EncryptionKey {
    let hk = Hkdf::<Sha256>::new(None, &master_key.0);
    let mut okm = [0u8; 32];
    let mut info = Vec::with_capacity(label.len() + context.len());
    info.extend_from_slice(label);
    info.extend_from_slice(context);
    hk.expand(&info, &mut okm)
        .expect("32-byte output is within the HKDF-SHA256 limit");
    EncryptionKey(okm)
}

/// Generate a cryptographically random 12-byte nonce
pub fn random_nonce() -> Nonce {
    use rand::RngCore;
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    Nonce(bytes)
}

/// Encrypt plaintext. A random nonce is generated and stored in the result.
pub fn encrypt(
    plaintext: &[u8],
    key: &EncryptionKey,
    algo: EncryptionAlgorithm,
) -> Result<EncryptedChunk, ReduceError> {
    let nonce = random_nonce();
    let ciphertext = match algo {
        EncryptionAlgorithm::None => {
            return Ok(EncryptedChunk {
                ciphertext: plaintext.to_vec(),
                nonce: Nonce([0u8; NONCE_LEN]),
                algo,
            })
        }
        EncryptionAlgorithm::AesGcm256 => {
            let cipher = Aes256Gcm::new_from_slice(&key.0)
                .map_err(|e| ReduceError::EncryptionFailed(e.to_string()))?;
            let n = aes_gcm::Nonce::from_slice(&nonce.0);
            cipher
                .encrypt(n, plaintext)
                .map_err(|e| ReduceError::EncryptionFailed(e.to_string()))?
        }
        EncryptionAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::aead::Aead as _;
            use chacha20poly1305::KeyInit as _;
            let cipher = ChaCha20Poly1305::new_from_slice(&key.0)
                .map_err(|e| ReduceError::EncryptionFailed(e.to_string()))?;
            let n = chacha20poly1305::Nonce::from_slice(&nonce.0);
            cipher
                .encrypt(n, plaintext)
                .map_err(|e| ReduceError::EncryptionFailed(e.to_string()))?
        }
    };
    Ok(EncryptedChunk {
        ciphertext,
        nonce,
        algo,
    })
}

/// Decrypt an EncryptedChunk. Returns DecryptionAuthFailed if tampered/corrupted.
pub fn decrypt(chunk: &EncryptedChunk, key: &EncryptionKey) -> Result<Vec<u8>, ReduceError> {
    match chunk.algo {
        EncryptionAlgorithm::None => Ok(chunk.ciphertext.clone()),
        EncryptionAlgorithm::AesGcm256 => {
            let cipher = Aes256Gcm::new_from_slice(&key.0)
                .map_err(|e| ReduceError::EncryptionFailed(e.to_string()))?;
            let n = aes_gcm::Nonce::from_slice(&chunk.nonce.0);
            cipher
                .decrypt(n, chunk.ciphertext.as_ref())
                .map_err(|_| ReduceError::DecryptionAuthFailed)
        }
        EncryptionAlgorithm::ChaCha20Poly1305 => {
            use chacha20poly1305::aead::Aead as _;
            use chacha20poly1305::KeyInit as _;
            let cipher = ChaCha20Poly1305::new_from_slice(&key.0)
                .map_err(|e| ReduceError::EncryptionFailed(e.to_string()))?;
            let n = chacha20poly1305::Nonce::from_slice(&chunk.nonce.0);
            cipher
                .decrypt(n, chunk.ciphertext.as_ref())
                .map_err(|_| ReduceError::DecryptionAuthFailed)
        }
    }
}

/// Encrypt a metadata blob with AES-256-GCM and return its wire form.
pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, ReduceError> {
    Ok(encrypt(plaintext, key, EncryptionAlgorithm::AesGcm256)?.to_bytes())
}

/// Reverse [`seal`].
pub fn unseal(sealed: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, ReduceError> {
    let chunk = EncryptedChunk::from_bytes(sealed, EncryptionAlgorithm::AesGcm256)?;
    decrypt(&chunk, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey([42u8; 32])
    }

    proptest! {
        #[test]
        fn prop_aesgcm_roundtrip(data in prop::collection::vec(0u8..=255, 0..65_536)) {
            let key = test_key();
            let enc = encrypt(&data, &key, EncryptionAlgorithm::AesGcm256).unwrap();
            let dec = decrypt(&enc, &key).unwrap();
            prop_assert_eq!(dec, data);
        }
        #[test]
        fn prop_chacha_roundtrip(data in prop::collection::vec(0u8..=255, 0..65_536)) {
            let key = test_key();
            let enc = encrypt(&data, &key, EncryptionAlgorithm::ChaCha20Poly1305).unwrap();
            let wire = enc.to_bytes();
            let parsed = EncryptedChunk::from_bytes(&wire, EncryptionAlgorithm::ChaCha20Poly1305).unwrap();
            prop_assert_eq!(decrypt(&parsed, &key).unwrap(), data);
        }
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_key();
        let mut enc = encrypt(b"secret", &key, EncryptionAlgorithm::AesGcm256).unwrap();
        enc.ciphertext[0] ^= 0xff;
        assert!(matches!(
            decrypt(&enc, &key),
            Err(ReduceError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let key = test_key();
        let enc = encrypt(b"secret", &key, EncryptionAlgorithm::AesGcm256).unwrap();
        let wrong = EncryptionKey([99u8; 32]);
        assert!(matches!(
            decrypt(&enc, &wrong),
            Err(ReduceError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn none_is_passthrough() {
        let key = test_key();
        let enc = encrypt(b"plain", &key, EncryptionAlgorithm::None).unwrap();
        assert_eq!(enc.to_bytes(), b"plain");
        assert_eq!(decrypt(&enc, &key).unwrap(), b"plain");
    }

    #[test]
    fn seal_roundtrip_and_truncation() {
        let key = test_key();
        let sealed = seal(b"repository metadata", &key).unwrap();
        assert_eq!(unseal(&sealed, &key).unwrap(), b"repository metadata");
        assert!(matches!(
            unseal(&sealed[..4], &key),
            Err(ReduceError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn hkdf_is_deterministic() {
        let master = test_key();
        let hash = [1u8; 32];
        assert_eq!(
            derive_chunk_key(&master, &hash).0,
            derive_chunk_key(&master, &hash).0
        );
    }

    #[test]
    fn different_chunks_get_different_keys() {
        let master = test_key();
        let k1 = derive_chunk_key(&master, &[1u8; 32]);
        let k2 = derive_chunk_key(&master, &[2u8; 32]);
        assert_ne!(k1.0, k2.0);
    }

    #[test]
    fn identifiers_parse() {
        assert_eq!("aes".parse::<EncryptionAlgorithm>().unwrap(), EncryptionAlgorithm::AesGcm256);
        assert_eq!("none".parse::<EncryptionAlgorithm>().unwrap(), EncryptionAlgorithm::None);
        assert!(matches!(
            "rot13".parse::<EncryptionAlgorithm>(),
            Err(ReduceError::UnsupportedAlgorithm(_))
        ));
    }
}
