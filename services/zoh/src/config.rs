//! Configuration types and loading
//!
//! Precedence: CLI flags > env vars > config file > defaults.
//! The store passphrase is only ever read from `ZOH_STORE_PASSPHRASE`,
//! never from the TOML, so it can't end up committed alongside it.

use std::path::{Path, PathBuf};

use common::Secret;
use serde::Deserialize;
use zoh_auth::constants::DEFAULT_REDIRECT_URI;
use zoh_auth::notice::is_truthy;
use zoh_auth::{BackendPreference, ClientCredentials, Region};

/// On-disk shape; every field optional so env vars can fill the gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    client_id: Option<String>,
    client_secret: Option<Secret<String>>,
    region: Option<Region>,
    credential_backend: Option<BackendPreference>,
    redirect_uri: Option<String>,
    data_dir: Option<PathBuf>,
}

/// Resolved configuration
#[derive(Debug)]
pub struct Config {
    pub client_id: Option<String>,
    pub client_secret: Option<Secret<String>>,
    pub region: Region,
    pub credential_backend: BackendPreference,
    pub redirect_uri: String,
    /// Holds the encrypted store, token caches, lock files and notice marker
    pub data_dir: PathBuf,
    pub passphrase: Option<Secret<String>>,
    pub quiet: bool,
}

/// Where the config file is expected, and whether the user asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPath {
    pub path: PathBuf,
    /// Explicit paths (flag or `ZOH_CONFIG`) must exist; the default may not.
    pub explicit: bool,
}

impl Config {
    /// Load from `source` (if any), then overlay environment variables.
    pub fn load(source: Option<&ConfigPath>) -> common::Result<Self> {
        let file = match source {
            Some(source) if source.explicit || source.path.exists() => {
                let contents = std::fs::read_to_string(&source.path)?;
                toml::from_str(&contents)?
            }
            _ => FileConfig::default(),
        };
        Self::resolve(file)
    }

    fn resolve(file: FileConfig) -> common::Result<Self> {
        let data_dir = match file.data_dir {
            Some(dir) => dir,
            None => dirs::data_local_dir()
                .map(|d| d.join("zoh"))
                .ok_or_else(|| {
                    common::Error::Config(
                        "cannot determine a data directory; set data_dir in the config file".into(),
                    )
                })?,
        };

        let mut config = Config {
            client_id: file.client_id,
            client_secret: file.client_secret,
            region: file.region.unwrap_or_default(),
            credential_backend: file.credential_backend.unwrap_or_default(),
            redirect_uri: file
                .redirect_uri
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            data_dir,
            passphrase: None,
            quiet: false,
        };

        if let Some(id) = env_var("ZOH_CLIENT_ID") {
            config.client_id = Some(id);
        }
        if let Some(secret) = env_var("ZOH_CLIENT_SECRET") {
            config.client_secret = Some(Secret::new(secret));
        }
        if let Some(region) = env_var("ZOH_REGION") {
            config.region = region
                .parse::<Region>()
                .map_err(|e| common::Error::Config(format!("ZOH_REGION: {e}")))?;
        }
        if let Some(backend) = env_var("ZOH_CREDENTIAL_BACKEND") {
            config.credential_backend = backend
                .parse::<BackendPreference>()
                .map_err(|e| common::Error::Config(format!("ZOH_CREDENTIAL_BACKEND: {e}")))?;
        }
        config.passphrase = env_var("ZOH_STORE_PASSPHRASE").map(Secret::new);
        config.quiet = env_var("ZOH_QUIET").is_some_and(|v| is_truthy(&v));

        if !config.redirect_uri.starts_with("http://") && !config.redirect_uri.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "redirect_uri must start with http:// or https://, got: {}",
                config.redirect_uri
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg, `ZOH_CONFIG`, or the platform default.
    pub fn resolve_path(cli_path: Option<&Path>) -> Option<ConfigPath> {
        if let Some(p) = cli_path {
            return Some(ConfigPath {
                path: p.to_path_buf(),
                explicit: true,
            });
        }
        if let Some(p) = env_var("ZOH_CONFIG") {
            return Some(ConfigPath {
                path: PathBuf::from(p),
                explicit: true,
            });
        }
        dirs::config_dir().map(|d| ConfigPath {
            path: d.join("zoh").join("config.toml"),
            explicit: false,
        })
    }

    /// Client registration, required by anything that talks to the token endpoint.
    pub fn credentials(&self) -> common::Result<ClientCredentials> {
        let client_id = self
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                common::Error::Config(
                    "client_id is not configured; set it in the config file or ZOH_CLIENT_ID".into(),
                )
            })?;
        let client_secret = self
            .client_secret
            .as_ref()
            .filter(|s| !s.is_blank())
            .ok_or_else(|| {
                common::Error::Config(
                    "client_secret is not configured; set it in the config file or ZOH_CLIENT_SECRET"
                        .into(),
                )
            })?;
        Ok(ClientCredentials::new(
            client_id,
            client_secret.expose().as_str(),
        ))
    }

    /// Client registration as configured, possibly empty. Only for operations
    /// that never reach the token endpoint (status, logout).
    pub fn credentials_unchecked(&self) -> ClientCredentials {
        ClientCredentials::new(
            self.client_id.clone().unwrap_or_default(),
            self.client_secret
                .as_ref()
                .map(|s| s.expose().clone())
                .unwrap_or_default(),
        )
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
