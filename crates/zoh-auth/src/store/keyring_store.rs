//! OS keyring-backed secret store

use std::collections::BTreeSet;
use std::sync::Mutex;

use keyring::credential::CredentialPersistence;
use tracing::debug;

use super::{Backend, SecretStore};
use crate::error::{Error, Result};

/// Entry that records which keys exist, since keyrings cannot enumerate.
const INDEX_KEY: &str = "__zoh_index__";

/// Secret store using the system keyring (Keychain / Credential Manager / keyutils).
pub struct KeyringStore {
    service: String,
    index_guard: Mutex<()>,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            index_guard: Mutex::new(()),
        }
    }

    /// Verify the keyring keeps entries across reboots and can actually be
    /// reached, by reading the index entry.
    pub fn probe(&self) -> Result<()> {
        require_durable(keyring::default::default_credential_builder().persistence())?;
        self.read_index().map(|_| ())
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key).map_err(|e| Error::Keyring(e.to_string()))
    }

    fn read_index(&self) -> Result<BTreeSet<String>> {
        match self.entry(INDEX_KEY)?.get_password() {
            Ok(json) => decode_index(&json),
            Err(keyring::Error::NoEntry) => Ok(BTreeSet::new()),
            Err(e) => Err(Error::Keyring(e.to_string())),
        }
    }

    fn write_index(&self, index: &BTreeSet<String>) -> Result<()> {
        let entry = self.entry(INDEX_KEY)?;
        if index.is_empty() {
            return match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(Error::Keyring(e.to_string())),
            };
        }
        entry
            .set_password(&encode_index(index)?)
            .map_err(|e| Error::Keyring(e.to_string()))
    }

    fn update_index(&self, f: impl FnOnce(&mut BTreeSet<String>) -> bool) -> Result<()> {
        let _guard = self
            .index_guard
            .lock()
            .map_err(|_| Error::Keyring("keyring index mutex poisoned".into()))?;
        let mut index = self.read_index()?;
        if f(&mut index) {
            self.write_index(&index)?;
        }
        Ok(())
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, key: &str) -> Result<String> {
        reject_reserved(key)?;
        self.entry(key)?
            .get_password()
            .map_err(|e| map_keyring_error(e, key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        reject_reserved(key)?;
        self.entry(key)?
            .set_password(value)
            .map_err(|e| map_keyring_error(e, key))?;
        self.update_index(|index| index.insert(key.to_string()))?;
        debug!(key, "secret saved to keyring");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        reject_reserved(key)?;
        self.entry(key)?
            .delete_credential()
            .map_err(|e| map_keyring_error(e, key))?;
        self.update_index(|index| index.remove(key))?;
        debug!(key, "secret removed from keyring");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.read_index()?.into_iter().collect())
    }

    fn backend(&self) -> Backend {
        Backend::Keyring
    }
}

/// The refresh token is the only durable credential, so a keyring that
/// forgets entries (kernel keyutils drops them at reboot) is unusable.
pub(super) fn require_durable(persistence: CredentialPersistence) -> Result<()> {
    if matches!(persistence, CredentialPersistence::UntilDelete) {
        return Ok(());
    }
    Err(Error::Keyring(format!(
        "platform keyring does not persist credentials ({})",
        persistence_name(&persistence)
    )))
}

/// `CredentialPersistence` does not implement `Debug`; name the variant.
fn persistence_name(persistence: &CredentialPersistence) -> &'static str {
    match persistence {
        CredentialPersistence::EntryOnly => "EntryOnly",
        CredentialPersistence::ProcessOnly => "ProcessOnly",
        CredentialPersistence::UntilReboot => "UntilReboot",
        CredentialPersistence::UntilDelete => "UntilDelete",
        _ => "unknown",
    }
}

fn reject_reserved(key: &str) -> Result<()> {
    if key == INDEX_KEY {
        return Err(Error::Config(format!("{INDEX_KEY} is reserved")));
    }
    Ok(())
}

fn map_keyring_error(err: keyring::Error, key: &str) -> Error {
    match err {
        keyring::Error::NoEntry => Error::NotFound(key.to_string()),
        other => Error::Keyring(other.to_string()),
    }
}

fn decode_index(json: &str) -> Result<BTreeSet<String>> {
    serde_json::from_str(json).map_err(|e| Error::Serialization(format!("keyring index: {e}")))
}

fn encode_index(index: &BTreeSet<String>) -> Result<String> {
    serde_json::to_string(index).map_err(|e| Error::Serialization(format!("keyring index: {e}")))
}
