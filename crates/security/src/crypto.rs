//! AES-256-GCM helpers and encryption key lookup.
//!
//! Ciphertexts are laid out as `nonce || sealed`, with a fresh random
//! 96-bit nonce per call.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::Rng;
use sha2::{Digest, Sha256};

pub const EPISODIC_KEY_ENV: &str = "CMP_EPISODIC_KEY";

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("{0} not set")]
    KeyMissing(&'static str),

    #[error("key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("ciphertext too short")]
    CiphertextTooShort,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed: authentication tag mismatch")]
    DecryptionFailed,
}

/// Supplies the AES-256 key for a tenant.
pub trait KeyProvider: Send + Sync {
    fn key(&self, tenant_id: &str) -> Result<[u8; KEY_LEN], CryptoError>;
}

/// One key for every tenant, read from `CMP_EPISODIC_KEY`.
///
/// A value of exactly 32 bytes is used as is; anything else is hashed with
/// SHA-256 into a 32-byte key.
pub struct EnvKeyProvider {
    lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl std::fmt::Debug for EnvKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvKeyProvider").finish_non_exhaustive()
    }
}

impl Default for EnvKeyProvider {
    fn default() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }
}

impl EnvKeyProvider {
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }
}

impl KeyProvider for EnvKeyProvider {
    fn key(&self, _tenant_id: &str) -> Result<[u8; KEY_LEN], CryptoError> {
        let raw = (self.lookup)(EPISODIC_KEY_ENV)
            .filter(|v| !v.is_empty())
            .ok_or(CryptoError::KeyMissing(EPISODIC_KEY_ENV))?;

        if let Ok(key) = <[u8; KEY_LEN]>::try_from(raw.as_bytes()) {
            return Ok(key);
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&Sha256::digest(raw.as_bytes()));
        Ok(key)
    }
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))
}

/// Seal `plaintext` under `key`.
pub fn encrypt_gcm(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher(key)?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce[..]);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open data produced by [`encrypt_gcm`].
pub fn decrypt_gcm(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher(key)?;
    if data.len() < NONCE_LEN {
        return Err(CryptoError::CiphertextTooShort);
    }
    let (nonce, sealed) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::DecryptionFailed)
}
