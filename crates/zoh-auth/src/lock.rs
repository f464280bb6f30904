//! Cross-process advisory file locks
//!
//! Separate `zoh` invocations share nothing but the filesystem, so the lock
//! is an OS-level exclusive lock on a zero-length file. Acquisition polls
//! with a bounded deadline: a crashed or wedged holder must turn into a
//! `LockTimeout`, not a hung CLI. The guard unlocks on drop, which covers
//! early returns, errors and unwinding alike.
//!
//! The lock file may be unlinked by its holder (logout). A waiter that then
//! wins the lock on the orphaned inode would not exclude a newcomer that
//! created a fresh file, so every successful lock is checked against what
//! the path currently names and retried on a fresh handle if they differ.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::constants::LOCK_POLL_MILLIS;
use crate::error::{Error, Result};

/// Held exclusive lock; released when dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the lock file and release the lock. A missing file is fine.
    ///
    /// On unix the file is unlinked while still locked, so no waiter can
    /// lock it afterwards without noticing. Windows cannot delete a file
    /// with an open handle, so there the lock is released first.
    pub fn remove(self) -> Result<()> {
        let path = self.path.clone();
        if cfg!(windows) {
            drop(self);
            return remove_lock_file(&path);
        }
        let removed = remove_lock_file(&path);
        drop(self);
        removed
    }
}

fn remove_lock_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::storage_io(path, e)),
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        } else {
            debug!(path = %self.path.display(), "lock released");
        }
    }
}

/// Entry point for lock acquisition.
pub struct FileLock;

impl FileLock {
    /// Acquire the lock at `path`, yielding to the runtime between attempts.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<LockGuard> {
        let mut file = open_lock_file(path)?;
        let started = Instant::now();
        loop {
            if attempt(&mut file, path)? {
                return Ok(locked(file, path, started));
            }
            if started.elapsed() >= timeout {
                return Err(Error::LockTimeout {
                    path: path.to_path_buf(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(Duration::from_millis(LOCK_POLL_MILLIS)).await;
        }
    }

    /// Blocking variant for synchronous callers such as the file store.
    pub fn acquire_blocking(path: &Path, timeout: Duration) -> Result<LockGuard> {
        let mut file = open_lock_file(path)?;
        let started = Instant::now();
        loop {
            if attempt(&mut file, path)? {
                return Ok(locked(file, path, started));
            }
            if started.elapsed() >= timeout {
                return Err(Error::LockTimeout {
                    path: path.to_path_buf(),
                    waited: timeout,
                });
            }
            std::thread::sleep(Duration::from_millis(LOCK_POLL_MILLIS));
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::storage_io(parent, e))?;
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::storage_io(path, e))
}

/// One acquisition attempt. A lock won on a file that is no longer linked
/// at `path` is dropped and `file` is replaced by a handle on the current
/// file, which is tried again straight away.
fn attempt(file: &mut File, path: &Path) -> Result<bool> {
    loop {
        if !try_lock(file, path)? {
            return Ok(false);
        }
        if still_linked(file, path)? {
            return Ok(true);
        }
        debug!(path = %path.display(), "lock file was replaced, reopening");
        let _ = FileExt::unlock(file);
        *file = open_lock_file(path)?;
    }
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata().map_err(|e| Error::storage_io(path, e))?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::storage_io(path, e)),
    }
}

// Holders off unix release before unlinking; see `LockGuard::remove`.
#[cfg(not(unix))]
fn still_linked(_file: &File, _path: &Path) -> Result<bool> {
    Ok(true)
}

/// `Ok(false)` means another holder has it.
fn try_lock(file: &File, path: &Path) -> Result<bool> {
    match FileExt::try_lock_exclusive(file) {
        Ok(()) => Ok(true),
        Err(e) if is_contended(&e) => Ok(false),
        Err(e) => Err(Error::storage_io(path, e)),
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn locked(file: File, path: &Path, started: Instant) -> LockGuard {
    debug!(path = %path.display(), waited_ms = started.elapsed().as_millis() as u64, "lock acquired");
    LockGuard {
        file,
        path: path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_and_creates_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/token_us.lock");

        let guard = FileLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        assert!(path.exists());
        assert_eq!(guard.path(), path.as_path());
    }

    #[tokio::test]
    async fn second_holder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_us.lock");

        let _held = FileLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        let started = Instant::now();
        let err = FileLock::acquire(&path, Duration::from_millis(300))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LockTimeout { .. }), "got: {err:?}");
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_eu.lock");

        let guard = FileLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        drop(guard);
        FileLock::acquire(&path, Duration::from_millis(200))
            .await
            .expect("lock must be free after guard drop");
    }

    #[tokio::test]
    async fn waiter_proceeds_once_holder_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_in.lock");

        let guard = FileLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            drop(guard);
        });

        FileLock::acquire(&path, Duration::from_secs(3))
            .await
            .expect("waiter should acquire after release");
        releaser.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn waiter_on_removed_lock_file_moves_to_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_us.lock");

        let first = FileLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        let waiter_path = path.clone();
        let waiter = tokio::spawn(async move {
            FileLock::acquire(&waiter_path, Duration::from_secs(3)).await
        });
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Holder unlinks then releases; the waiter had the old inode open
        first.remove().unwrap();
        let second = waiter.await.unwrap().expect("waiter should acquire");
        assert!(path.exists(), "waiter must hold a lock on a linked file");

        let err = FileLock::acquire(&path, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }), "got: {err:?}");
        drop(second);
    }

    #[tokio::test]
    async fn remove_deletes_file_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_eu.lock");

        let guard = FileLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        guard.remove().unwrap();
        assert!(!path.exists());

        let again = FileLock::acquire(&path, Duration::from_millis(200)).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        again.remove().expect("already-removed lock file is not an error");
    }

    #[test]
    fn blocking_variant_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.enc.lock");

        let _held = FileLock::acquire_blocking(&path, Duration::from_secs(1)).unwrap();
        let err = FileLock::acquire_blocking(&path, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
    }

    #[test]
    fn different_paths_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _us = FileLock::acquire_blocking(&dir.path().join("token_us.lock"), Duration::from_secs(1))
            .unwrap();
        FileLock::acquire_blocking(&dir.path().join("token_eu.lock"), Duration::from_millis(100))
            .expect("regions lock independently");
    }
}
