//! Error types for credential storage and token lifecycle operations

use std::path::PathBuf;
use std::time::Duration;

use crate::region::Region;

/// Errors from the secret store and token cache.
///
/// Authentication-class variants (`NotAuthenticated`, `TokenRevoked`) carry
/// the remediation command in their message so the CLI can print them as-is.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not logged in for region {region}; run `zoh auth login --region {region}`")]
    NotAuthenticated { region: Region },

    #[error(
        "refresh token for region {region} was revoked or expired ({detail}); run `zoh auth login --region {region}` again"
    )]
    TokenRevoked { region: Region, detail: String },

    #[error("token refresh failed with HTTP {status}: {body}")]
    RefreshFailed { status: u16, body: String },

    #[error(
        "timed out after {waited:?} waiting for lock {}; another zoh process may be busy, retry shortly",
        .path.display()
    )]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error(
        "cannot decrypt credential store: {0}; check that ZOH_STORE_PASSPHRASE matches the one used at login"
    )]
    DecryptionFailed(String),

    #[error("storage I/O error at {}: {message}", .path.display())]
    StorageIo { path: PathBuf, message: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}; retry shortly")]
    Timeout(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Coarse classification used at the CLI boundary to pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The user must log in again.
    Auth,
    /// The provider rejected a request.
    Api,
    /// Transient contention or timeout; retrying may succeed.
    Retryable,
    Other,
}

impl Error {
    pub(crate) fn storage_io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::StorageIo {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Classify this error for exit-code selection.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotAuthenticated { .. } | Error::TokenRevoked { .. } => ErrorKind::Auth,
            Error::RefreshFailed { .. } | Error::Http(_) | Error::TokenExchange(_) => {
                ErrorKind::Api
            }
            Error::LockTimeout { .. } | Error::Timeout(_) => ErrorKind::Retryable,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
