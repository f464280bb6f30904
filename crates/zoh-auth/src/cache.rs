//! Per-region access token cache
//!
//! The refresh token lives in the secret store and is the only durable
//! credential. The access token is cached in `token_<region>.json` purely to
//! skip network round-trips; a missing or unreadable cache just costs one
//! refresh.
//!
//! Every operation runs under the region's lock file, so concurrent CLI
//! processes refresh at most once: the second process waits, then finds the
//! first one's fresh cache.
//!
//! Flow of `token()`:
//! 1. Acquire `token_<region>.lock` (bounded wait)
//! 2. Cached token valid for more than 5 minutes → return it
//! 3. Otherwise refresh via the token endpoint, store a rotated refresh
//!    token if one came back, write the cache, return

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::{LOCK_TIMEOUT_SECS, REFRESH_THRESHOLD_SECS};
use crate::error::{Error, Result};
use crate::lock::FileLock;
use crate::region::Region;
use crate::store::{Backend, SecretStore, write_atomic};
use crate::token::{self, ClientCredentials, TokenResponse};

/// A usable access token, as persisted in the cache file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expiry: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token is still outside the proactive refresh window.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expiry - now > TimeDelta::seconds(REFRESH_THRESHOLD_SECS)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Full token set obtained at login.
#[derive(Clone)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub expiry: DateTime<Utc>,
}

impl OAuthToken {
    /// Convert a token endpoint response received at `now`.
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            expiry: expiry_after(now, response.expires_in),
            access_token: response.access_token,
            token_type: response.token_type,
            refresh_token: response.refresh_token,
        }
    }

    fn access(&self) -> AccessToken {
        AccessToken {
            access_token: self.access_token.clone(),
            token_type: self.token_type.clone(),
            expiry: self.expiry,
        }
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Login state for `zoh auth status`, read without touching the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStatus {
    pub region: Region,
    pub logged_in: bool,
    pub cached_expiry: Option<DateTime<Utc>>,
    pub backend: Backend,
}

fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    now + TimeDelta::try_seconds(expires_in.max(0)).unwrap_or_else(TimeDelta::zero)
}

/// Token lifecycle for one region.
pub struct TokenCache {
    region: Region,
    cache_path: PathBuf,
    lock_path: PathBuf,
    store: Arc<dyn SecretStore>,
    credentials: ClientCredentials,
    client: reqwest::Client,
    token_url: String,
    lock_timeout: Duration,
}

impl TokenCache {
    /// Create a cache keeping its files in `data_dir`.
    pub fn new(
        region: Region,
        data_dir: &Path,
        store: Arc<dyn SecretStore>,
        credentials: ClientCredentials,
        client: reqwest::Client,
    ) -> Self {
        Self {
            region,
            cache_path: data_dir.join(region.cache_file_name()),
            lock_path: data_dir.join(region.lock_file_name()),
            store,
            credentials,
            client,
            token_url: region.token_url(),
            lock_timeout: Duration::from_secs(LOCK_TIMEOUT_SECS),
        }
    }

    /// Override the token endpoint (tests, proxies).
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Return a valid access token, refreshing if the cached one is missing,
    /// unreadable, or within 5 minutes of expiry.
    pub async fn token(&self) -> Result<AccessToken> {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout).await?;

        if let Some(cached) = self.read_cache() {
            if cached.is_fresh(Utc::now()) {
                debug!(region = %self.region, expiry = %cached.expiry, "using cached access token");
                return Ok(cached);
            }
            debug!(region = %self.region, expiry = %cached.expiry, "cached access token inside refresh window");
        }

        let token = self.refresh().await?;
        if let Err(e) = self.write_cache(&token) {
            warn!(region = %self.region, error = %e, "failed to persist refreshed access token");
        }
        Ok(token)
    }

    /// Seed state after an interactive or manual login.
    pub async fn save_initial_tokens(&self, token: &OAuthToken) -> Result<()> {
        let refresh = token.refresh_token.as_deref().ok_or_else(|| {
            Error::TokenExchange(
                "login response did not include a refresh token; the authorization must request offline access"
                    .into(),
            )
        })?;

        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout).await?;
        let (key, refresh) = (self.region.refresh_token_key(), refresh.to_string());
        self.with_store(move |store| store.set(&key, &refresh))
            .await?;
        if let Err(e) = self.write_cache(&token.access()) {
            warn!(region = %self.region, error = %e, "failed to persist initial access token");
        }
        info!(region = %self.region, backend = %self.store.backend(), "saved login tokens");
        Ok(())
    }

    /// Forget everything for this region: refresh token, cache and lock file.
    pub async fn clear_tokens(&self) -> Result<()> {
        let lock = FileLock::acquire(&self.lock_path, self.lock_timeout).await?;

        let key = self.region.refresh_token_key();
        match self.with_store(move |store| store.delete(&key)).await {
            Ok(()) => debug!(region = %self.region, "refresh token deleted"),
            Err(e) if e.is_not_found() => debug!(region = %self.region, "no refresh token to delete"),
            Err(e) => return Err(e),
        }
        remove_if_exists(&self.cache_path)?;
        lock.remove()?;

        info!(region = %self.region, "cleared tokens");
        Ok(())
    }

    /// Stored refresh token, if logged in.
    pub fn refresh_token(&self) -> Result<Option<Secret<String>>> {
        match self.store.get(&self.region.refresh_token_key()) {
            Ok(token) => Ok(Some(Secret::new(token))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn status(&self) -> Result<TokenStatus> {
        Ok(TokenStatus {
            region: self.region,
            logged_in: self.refresh_token()?.is_some(),
            cached_expiry: self.read_cache().map(|t| t.expiry),
            backend: self.store.backend(),
        })
    }

    async fn refresh(&self) -> Result<AccessToken> {
        let key = self.region.refresh_token_key();
        let lookup = key.clone();
        let refresh_token = match self.with_store(move |store| store.get(&lookup)).await {
            Ok(token) => Secret::new(token),
            Err(e) if e.is_not_found() => {
                return Err(Error::NotAuthenticated {
                    region: self.region,
                });
            }
            Err(e) => return Err(e),
        };

        info!(region = %self.region, "refreshing access token");
        let response = token::refresh_access_token(
            &self.client,
            &self.token_url,
            &self.credentials,
            refresh_token.expose(),
            self.region,
        )
        .await?;
        let now = Utc::now();

        if let Some(rotated) = response
            .refresh_token
            .as_deref()
            .filter(|r| *r != refresh_token.expose().as_str())
        {
            let rotated = rotated.to_string();
            match self.with_store(move |store| store.set(&key, &rotated)).await {
                Ok(()) => info!(region = %self.region, "stored rotated refresh token"),
                Err(e) => warn!(
                    region = %self.region,
                    error = %e,
                    "failed to store rotated refresh token; a later refresh may require login"
                ),
            }
        }

        Ok(OAuthToken::from_response(response, now).access())
    }

    /// Run a store call on the blocking pool. Keyring and file backends do
    /// synchronous I/O and the file store may wait on its own lock.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SecretStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| Error::Task(format!("secret store call: {e}")))?
    }

    fn read_cache(&self) -> Option<AccessToken> {
        let contents = match std::fs::read(&self.cache_path) {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.cache_path.display(), error = %e, "ignoring unreadable token cache");
                }
                return None;
            }
        };
        match serde_json::from_slice(&contents) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(path = %self.cache_path.display(), error = %e, "ignoring corrupt token cache");
                None
            }
        }
    }

    fn write_cache(&self, token: &AccessToken) -> Result<()> {
        let json = serde_json::to_vec_pretty(token)
            .map_err(|e| Error::Serialization(format!("serializing token cache: {e}")))?;
        write_atomic(&self.cache_path, &json)?;
        debug!(path = %self.cache_path.display(), "token cache written");
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::storage_io(path, e)),
    }
}
