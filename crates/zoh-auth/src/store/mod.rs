//! Secret storage for long-lived refresh tokens
//!
//! Provides the [`SecretStore`] trait and implementations:
//! - [`KeyringStore`] - OS keyring (Keychain / Credential Manager / keyutils)
//! - [`EncryptedFileStore`] - AES-256-GCM encrypted JSON map on disk
//! - [`MemoryStore`] - in-process map, for embedding and tests
//!
//! Callers get an `Arc<dyn SecretStore>` from [`open_store`] and never see
//! which backend was chosen.

pub mod crypto;
mod file;
mod keyring_store;
mod memory;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use common::Secret;
use serde::Deserialize;
use tracing::{debug, info};

pub use crypto::KdfParams;
pub use file::{EncryptedFileStore, STORE_FILE_NAME, local_identity};
pub use keyring_store::KeyringStore;
pub use memory::MemoryStore;
pub(crate) use file::write_atomic;

use crate::constants::KEYRING_SERVICE;
use crate::environment::{KeyringSupport, Probe, detect_keyring_support};
use crate::error::{Error, Result};
use crate::notice::NoticeMarker;

/// Key/value persistence for secrets.
///
/// `get` and `delete` fail with [`Error::NotFound`] for absent keys; `set`
/// is an upsert. `list` has no ordering guarantee.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<String>>;

    /// Which backend this is, for diagnostics.
    fn backend(&self) -> Backend;
}

/// Concrete backend behind a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Keyring,
    EncryptedFile,
    Memory,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Keyring => "keyring",
            Backend::EncryptedFile => "encrypted-file",
            Backend::Memory => "memory",
        })
    }
}

/// User's backend choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Keyring when the environment supports it, encrypted file otherwise.
    #[default]
    Auto,
    Keyring,
    File,
}

impl FromStr for BackendPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            other => Err(Error::Config(format!(
                "unknown credential backend {other:?}, expected auto, keyring or file"
            ))),
        }
    }
}

/// Everything the store factory needs.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub data_dir: PathBuf,
    pub preference: BackendPreference,
    pub passphrase: Option<Secret<String>>,
    pub notice: NoticeMarker,
    pub kdf: KdfParams,
    pub keyring_service: String,
}

impl StoreOptions {
    pub fn new(data_dir: impl Into<PathBuf>, notice: NoticeMarker) -> Self {
        Self {
            data_dir: data_dir.into(),
            preference: BackendPreference::default(),
            passphrase: None,
            notice,
            kdf: KdfParams::default(),
            keyring_service: KEYRING_SERVICE.to_string(),
        }
    }

    pub fn file_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE_NAME)
    }
}

/// Open the secret store appropriate for this environment.
pub fn open_store(options: &StoreOptions, probe: &dyn Probe) -> Result<Arc<dyn SecretStore>> {
    select_backend(options, probe, &|| -> Result<Arc<dyn SecretStore>> {
        let store = KeyringStore::new(&options.keyring_service);
        store.probe()?;
        Ok(Arc::new(store))
    })
}

fn select_backend(
    options: &StoreOptions,
    probe: &dyn Probe,
    open_keyring: &dyn Fn() -> Result<Arc<dyn SecretStore>>,
) -> Result<Arc<dyn SecretStore>> {
    let fallback_reason = match options.preference {
        BackendPreference::File => None,
        BackendPreference::Keyring => {
            let store = open_keyring()?;
            info!(backend = %store.backend(), "opened secret store");
            return Ok(store);
        }
        BackendPreference::Auto => match detect_keyring_support(probe) {
            KeyringSupport::Usable => match open_keyring() {
                Ok(store) => {
                    info!(backend = %store.backend(), "opened secret store");
                    return Ok(store);
                }
                Err(e) => {
                    debug!(error = %e, "keyring probe failed");
                    Some(format!("keyring could not be opened: {e}"))
                }
            },
            KeyringSupport::Unusable(reason) => Some(reason),
        },
    };

    let store = EncryptedFileStore::open(
        options.file_path(),
        options.passphrase.as_ref(),
        options.kdf,
    )?;
    info!(
        backend = %store.backend(),
        path = %store.path().display(),
        "opened secret store"
    );

    if let Some(message) = fallback_notice(
        fallback_reason.as_deref(),
        options.passphrase.is_some(),
        &store,
    ) {
        options.notice.warn_once(&message);
    }
    Ok(Arc::new(store))
}

fn fallback_notice(
    reason: Option<&str>,
    has_passphrase: bool,
    store: &EncryptedFileStore,
) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(reason) = reason {
        parts.push(format!(
            "OS keyring not used ({reason}); credentials are stored encrypted in {}.",
            store.path().display()
        ));
    }
    if !has_passphrase {
        parts.push(
            "The encryption key is derived from your username and hostname; set ZOH_STORE_PASSPHRASE for stronger protection."
                .to_string(),
        );
    }
    (!parts.is_empty()).then(|| parts.join(" "))
}
