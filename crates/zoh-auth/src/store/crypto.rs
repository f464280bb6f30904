//! Authenticated encryption for the credential file
//!
//! Blob layout: 12-byte random nonce followed by the AES-256-GCM ciphertext
//! (tag included). A fresh nonce is drawn for every write. Keys come from
//! Argon2id over either the user's passphrase (fixed domain salt) or
//! `username@hostname` (salt bound to that identity).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngExt;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const SALT_DOMAIN: &str = "zoh-credential-store:";

/// 256-bit encryption key, wiped on drop.
pub type StoreKey = Zeroizing<[u8; KEY_LEN]>;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// OWASP baseline for Argon2id: 19 MiB, 2 passes, 1 lane.
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Salt for identity-derived keys, bound to `username@hostname`.
pub fn identity_salt(identity: &str) -> [u8; SALT_LEN] {
    domain_salt(&format!("identity:{identity}"))
}

/// Salt for passphrase-derived keys. Independent of the machine, so a
/// passphrase store survives a hostname or username change and can be
/// copied between hosts.
pub fn passphrase_salt() -> [u8; SALT_LEN] {
    domain_salt("passphrase")
}

fn domain_salt(label: &str) -> [u8; SALT_LEN] {
    let digest = Sha256::digest(format!("{SALT_DOMAIN}{label}").as_bytes());
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&digest[..SALT_LEN]);
    salt
}

/// Derive the store key from `secret` with Argon2id.
pub fn derive_key(secret: &[u8], salt: &[u8], params: KdfParams) -> Result<StoreKey> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| Error::Config(format!("invalid Argon2 parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(secret, salt, &mut key[..])
        .map_err(|e| Error::Config(format!("key derivation failed: {e}")))?;
    Ok(key)
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &StoreKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| Error::Config(format!("invalid key length: {e}")))?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Serialization("AES-GCM encryption failed".into()))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a `nonce || ciphertext` blob. Wrong key, tampering and truncation
/// all surface as `DecryptionFailed`.
pub fn decrypt(key: &StoreKey, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if blob.len() < NONCE_LEN {
        return Err(Error::DecryptionFailed(format!(
            "file is {} bytes, shorter than the {NONCE_LEN}-byte nonce",
            blob.len()
        )));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| Error::Config(format!("invalid key length: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| Error::DecryptionFailed("authentication failed".into()))
}
