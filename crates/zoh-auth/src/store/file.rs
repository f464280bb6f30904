//! Encrypted single-file secret store
//!
//! The whole key/value map is one JSON document encrypted as a single blob.
//! Every operation re-reads the file, so concurrent processes always act on
//! the latest committed state. Mutations run under an in-process mutex plus
//! a cross-process lock file and commit through temp-file + rename, so a
//! crash mid-write leaves the previous file intact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use common::Secret;
use tracing::debug;
use zeroize::Zeroizing;

use super::crypto::{self, KdfParams, StoreKey};
use super::{Backend, SecretStore};
use crate::error::{Error, Result};
use crate::lock::FileLock;

/// File name of the encrypted store inside the data directory.
pub const STORE_FILE_NAME: &str = "credentials.enc";

const WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

type SecretMap = HashMap<String, String>;

pub struct EncryptedFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    key: StoreKey,
    write_guard: Mutex<()>,
}

impl EncryptedFileStore {
    /// Open the store at `path`, deriving the key from `passphrase` or, when
    /// absent, from the local `username@hostname` identity.
    ///
    /// The file is not touched until the first operation; a missing file is
    /// an empty store.
    pub fn open(path: PathBuf, passphrase: Option<&Secret<String>>, kdf: KdfParams) -> Result<Self> {
        Self::open_as(path, passphrase, kdf, &local_identity())
    }

    /// A passphrase key never depends on `identity`; only the fallback
    /// identity key does.
    pub(crate) fn open_as(
        path: PathBuf,
        passphrase: Option<&Secret<String>>,
        kdf: KdfParams,
        identity: &str,
    ) -> Result<Self> {
        let key = match passphrase {
            Some(p) => crypto::derive_key(p.expose().as_bytes(), &crypto::passphrase_salt(), kdf)?,
            None => crypto::derive_key(identity.as_bytes(), &crypto::identity_salt(identity), kdf)?,
        };
        Ok(Self::with_key(path, key))
    }

    /// Open the store with an already-derived key.
    pub fn with_key(path: PathBuf, key: StoreKey) -> Self {
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            key,
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<SecretMap> {
        let blob = match std::fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SecretMap::new()),
            Err(e) => return Err(Error::storage_io(&self.path, e)),
        };
        if blob.is_empty() {
            return Ok(SecretMap::new());
        }
        let plaintext = crypto::decrypt(&self.key, &blob)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| Error::Serialization(format!("credential store contents: {e}")))
    }

    fn write_all(&self, data: &SecretMap) -> Result<()> {
        let json = Zeroizing::new(
            serde_json::to_vec(data)
                .map_err(|e| Error::Serialization(format!("serializing credential store: {e}")))?,
        );
        let blob = crypto::encrypt(&self.key, &json)?;
        write_atomic(&self.path, &blob)?;
        debug!(path = %self.path.display(), entries = data.len(), "persisted credential store");
        Ok(())
    }

    /// Read-modify-write under both the in-process and cross-process locks.
    /// `f` returns whether the map changed; unchanged maps are not rewritten.
    fn update<T>(&self, f: impl FnOnce(&mut SecretMap) -> Result<(T, bool)>) -> Result<T> {
        let _local = self
            .write_guard
            .lock()
            .map_err(|_| Error::storage_io(&self.path, "credential store mutex poisoned"))?;
        let _file = FileLock::acquire_blocking(&self.lock_path, WRITE_LOCK_TIMEOUT)?;

        let mut data = self.read_all()?;
        let (out, changed) = f(&mut data)?;
        if changed {
            self.write_all(&data)?;
        }
        Ok(out)
    }
}

impl SecretStore for EncryptedFileStore {
    fn get(&self, key: &str) -> Result<String> {
        self.read_all()?
            .remove(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|data| {
            let previous = data.insert(key.to_string(), value.to_string());
            Ok(((), previous.as_deref() != Some(value)))
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.update(|data| match data.remove(key) {
            Some(_) => Ok(((), true)),
            None => Err(Error::NotFound(key.to_string())),
        })
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.read_all()?.into_keys().collect())
    }

    fn backend(&self) -> Backend {
        Backend::EncryptedFile
    }
}

/// `username@hostname`, the fallback key material and salt input.
pub fn local_identity() -> String {
    let user = ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{user}@{host}")
}

/// Write `bytes` to `path` atomically.
///
/// Writes a temp file in the same directory (created 0600 on unix), syncs
/// it, then renames it over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let dir = path
        .parent()
        .ok_or_else(|| Error::storage_io(path, "path has no parent directory"))?;
    std::fs::create_dir_all(dir).map_err(|e| Error::storage_io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let result = options
        .open(&tmp_path)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&tmp_path, path));

    if let Err(e) = result {
        if let Err(cleanup) = std::fs::remove_file(&tmp_path) {
            debug!(path = %tmp_path.display(), error = %cleanup, "could not remove temp file");
        }
        return Err(Error::storage_io(path, e));
    }
    Ok(())
}
