//! One-time user notices backed by a marker file
//!
//! Backend fallback and weak-key warnings are worth showing once per
//! installation, not on every invocation. The marker is passed explicitly to
//! whoever may need to warn, so tests can point it at a temp dir.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// File name of the marker inside the data directory.
pub const NOTICE_MARKER_FILE: &str = ".store-notice-shown";

#[derive(Debug, Clone)]
pub struct NoticeMarker {
    path: PathBuf,
    quiet: bool,
}

impl NoticeMarker {
    pub fn new(path: impl Into<PathBuf>, quiet: bool) -> Self {
        Self {
            path: path.into(),
            quiet,
        }
    }

    /// Marker stored in `data_dir` under the standard name.
    pub fn in_dir(data_dir: &Path, quiet: bool) -> Self {
        Self::new(data_dir.join(NOTICE_MARKER_FILE), quiet)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the notice has already been shown on this machine.
    pub fn is_marked(&self) -> bool {
        self.path.exists()
    }

    /// Emit `message` unless quiet or already shown. Returns whether it was emitted.
    pub fn warn_once(&self, message: &str) -> bool {
        if self.quiet || self.is_marked() {
            return false;
        }
        warn!("{message}");
        if let Err(e) = self.mark() {
            debug!(path = %self.path.display(), error = %e, "could not write notice marker");
        }
        true
    }

    fn mark(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, b"")
    }
}

/// Interpret a quiet-mode environment value.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
