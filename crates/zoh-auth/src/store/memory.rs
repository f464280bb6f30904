//! In-memory secret store, primarily for tests and embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{Backend, SecretStore};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct MemoryStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::Keyring("memory store lock poisoned".into())
}

impl SecretStore for MemoryStore {
    fn get(&self, key: &str) -> Result<String> {
        self.secrets
            .read()
            .map_err(|_| poisoned())?
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.secrets
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.secrets
            .write()
            .map_err(|_| poisoned())?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.secrets.read().map_err(|_| poisoned())?.keys().cloned().collect())
    }

    fn backend(&self) -> Backend {
        Backend::Memory
    }
}
