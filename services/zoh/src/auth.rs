//! `zoh auth` command handlers
//!
//! Handlers return data and `run` does the printing, so the flows can be
//! exercised against a mock accounts server.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use zoh_auth::constants::DEFAULT_SCOPES;
use zoh_auth::environment::SystemProbe;
use zoh_auth::notice::NoticeMarker;
use zoh_auth::{
    Backend, OAuthToken, Region, SecretStore, StoreOptions, TokenCache, TokenStatus,
    build_authorization_url, exchange_code, generate_state, http_client, open_store, revoke_token,
};

use crate::cli::AuthCommand;
use crate::config::Config;

/// Everything the auth handlers share for one invocation.
pub struct AuthContext {
    config: Config,
    store: Arc<dyn SecretStore>,
    client: reqwest::Client,
    /// Replaces the region's accounts server (mock servers in tests)
    accounts_url: Option<String>,
}

impl AuthContext {
    /// Open the credential store selected by `config`.
    pub fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("creating data directory {}", config.data_dir.display())
        })?;

        let notice = NoticeMarker::in_dir(&config.data_dir, config.quiet);
        let mut options = StoreOptions::new(&config.data_dir, notice);
        options.preference = config.credential_backend;
        options.passphrase = config.passphrase.clone();

        let store = open_store(&options, &SystemProbe).context("opening credential store")?;
        Ok(Self::new(config, store, http_client()?))
    }

    pub fn new(config: Config, store: Arc<dyn SecretStore>, client: reqwest::Client) -> Self {
        Self {
            config,
            store,
            client,
            accounts_url: None,
        }
    }

    #[cfg(test)]
    fn with_accounts_url(mut self, url: impl Into<String>) -> Self {
        self.accounts_url = Some(url.into());
        self
    }

    fn token_url(&self, region: Region) -> String {
        match &self.accounts_url {
            Some(base) => format!("{base}/oauth/v2/token"),
            None => region.token_url(),
        }
    }

    fn revoke_url(&self, region: Region) -> String {
        match &self.accounts_url {
            Some(base) => format!("{base}/oauth/v2/token/revoke"),
            None => region.revoke_url(),
        }
    }

    fn cache(&self, region: Region, credentials: zoh_auth::ClientCredentials) -> TokenCache {
        TokenCache::new(
            region,
            &self.config.data_dir,
            self.store.clone(),
            credentials,
            self.client.clone(),
        )
        .with_token_url(self.token_url(region))
    }

    /// URL the user must open to authorize, plus the state to expect back.
    pub fn authorization_url(&self, region: Region) -> Result<(String, String)> {
        let credentials = self.config.credentials()?;
        let state = generate_state();
        let url = build_authorization_url(
            region,
            &credentials.client_id,
            DEFAULT_SCOPES,
            &self.config.redirect_uri,
            &state,
        );
        Ok((url, state))
    }

    /// Exchange a pasted code (or redirect URL) and seed the token cache.
    pub async fn login(
        &self,
        region: Region,
        input: &str,
        expected_state: Option<&str>,
    ) -> Result<Backend> {
        let credentials = self.config.credentials()?;
        let code = extract_code(input, expected_state)?;

        let response = exchange_code(
            &self.client,
            &self.token_url(region),
            &credentials,
            &code,
            &self.config.redirect_uri,
        )
        .await
        .context("exchanging authorization code")?;
        let token = OAuthToken::from_response(response, Utc::now());

        self.cache(region, credentials)
            .save_initial_tokens(&token)
            .await
            .context("saving tokens")?;
        info!(%region, backend = %self.store.backend(), "logged in");
        Ok(self.store.backend())
    }

    pub async fn token(&self, region: Region) -> Result<String> {
        let cache = self.cache(region, self.config.credentials()?);
        let token = cache.token().await.context("obtaining access token")?;
        Ok(token.access_token)
    }

    pub fn status(&self, region: Region) -> Result<TokenStatus> {
        let cache = self.cache(region, self.config.credentials_unchecked());
        Ok(cache.status()?)
    }

    /// Revoke (best-effort) and clear one region. Returns whether it was logged in.
    pub async fn logout(&self, region: Region) -> Result<bool> {
        let cache = self.cache(region, self.config.credentials_unchecked());
        let refresh_token = cache.refresh_token()?;

        if let Some(token) = &refresh_token {
            match revoke_token(&self.client, &self.revoke_url(region), token.expose()).await {
                Ok(()) => info!(%region, "refresh token revoked"),
                Err(e) => warn!(%region, error = %e, "revoking refresh token failed; clearing local state anyway"),
            }
        }
        cache.clear_tokens().await?;
        Ok(refresh_token.is_some())
    }

    /// Log out of every region, continuing past failures.
    pub async fn logout_all(&self) -> Result<Vec<Region>> {
        let mut cleared = Vec::new();
        let mut failed = Vec::new();
        for region in Region::ALL {
            match self.logout(region).await {
                Ok(true) => cleared.push(region),
                Ok(false) => {}
                Err(e) => {
                    error!(%region, error = format!("{e:#}"), "logout failed");
                    failed.push(region.code());
                }
            }
        }
        if !failed.is_empty() {
            bail!("logout failed for region(s): {}", failed.join(", "));
        }
        Ok(cleared)
    }
}

/// Pull the authorization code out of what the user pasted: either the
/// bare code or the whole redirect URL. Query values are percent-decoded,
/// and a redirect URL must carry the expected `state` when one was issued.
fn extract_code(input: &str, expected_state: Option<&str>) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        bail!("no authorization code provided");
    }
    if !input.contains("code=") && !input.contains("error=") {
        return Ok(input.to_string());
    }

    let url = reqwest::Url::parse(input)
        .or_else(|_| {
            let query = input.split_once('?').map_or(input, |(_, q)| q);
            reqwest::Url::parse(&format!("http://localhost/?{query}"))
        })
        .context("redirect URL could not be parsed")?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        bail!("authorization was denied: {error}");
    }
    if let Some(expected) = expected_state {
        match params.get("state") {
            Some(actual) if actual == expected => {}
            Some(_) => bail!("state mismatch in redirect URL; restart `zoh auth login`"),
            None => bail!("redirect URL has no state parameter; paste the full URL from the browser"),
        }
    }
    match params.get("code") {
        Some(code) if !code.is_empty() => Ok(code.clone()),
        _ => bail!("redirect URL does not contain an authorization code"),
    }
}

async fn prompt_for_code(url: &str) -> Result<String> {
    eprintln!("Open this URL in a browser and approve access:\n\n  {url}\n");
    eprintln!("Then paste the code (or the whole redirect URL) here:");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("reading authorization code from stdin")?;
    Ok(line)
}

/// Execute an `auth` subcommand for the configured region.
pub async fn run(command: AuthCommand, config: Config) -> Result<()> {
    let region = config.region;
    let ctx = AuthContext::open(config)?;

    match command {
        AuthCommand::Login { code } => {
            let (input, state) = match code {
                Some(code) => (code, None),
                None => {
                    let (url, state) = ctx.authorization_url(region)?;
                    (prompt_for_code(&url).await?, Some(state))
                }
            };
            let backend = ctx.login(region, &input, state.as_deref()).await?;
            println!("Logged in to region {region} (credentials stored in {backend})");
        }
        AuthCommand::Token => {
            println!("{}", ctx.token(region).await?);
        }
        AuthCommand::Status => {
            let status = ctx.status(region)?;
            println!("region:     {}", status.region);
            println!("backend:    {}", status.backend);
            println!("logged in:  {}", if status.logged_in { "yes" } else { "no" });
            match status.cached_expiry {
                Some(expiry) if expiry > Utc::now() => {
                    println!("access:     valid until {}", expiry.to_rfc3339())
                }
                Some(expiry) => println!("access:     expired at {}", expiry.to_rfc3339()),
                None => println!("access:     none cached"),
            }
        }
        AuthCommand::Logout { all: false } => {
            if ctx.logout(region).await? {
                println!("Logged out of region {region}");
            } else {
                println!("Not logged in to region {region}");
            }
        }
        AuthCommand::Logout { all: true } => {
            let cleared = ctx.logout_all().await?;
            if cleared.is_empty() {
                println!("Not logged in to any region");
            }
            for region in cleared {
                println!("Logged out of region {region}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;
    use zoh_auth::BackendPreference;
    use zoh_auth::store::MemoryStore;

    #[derive(Clone, Default)]
    struct Accounts {
        token_hits: Arc<AtomicUsize>,
        revoke_hits: Arc<AtomicUsize>,
        revoke_fails: bool,
    }

    async fn token_endpoint(
        State(accounts): State<Accounts>,
        Form(form): Form<HashMap<String, String>>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        accounts.token_hits.fetch_add(1, Ordering::SeqCst);
        if form.get("code").map(String::as_str) != Some("1000.good") {
            return (StatusCode::OK, Json(json!({"error": "invalid_code"})));
        }
        (
            StatusCode::OK,
            Json(json!({
                "access_token": "1000.access",
                "refresh_token": "1000.refresh",
                "token_type": "Bearer",
                "expires_in": 3600
            })),
        )
    }

    async fn revoke_endpoint(
        State(accounts): State<Accounts>,
        Query(query): Query<HashMap<String, String>>,
    ) -> StatusCode {
        accounts.revoke_hits.fetch_add(1, Ordering::SeqCst);
        assert_eq!(query.get("token").map(String::as_str), Some("1000.refresh"));
        if accounts.revoke_fails {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        }
    }

    async fn mock_accounts(accounts: Accounts) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new()
            .route("/oauth/v2/token", post(token_endpoint))
            .route("/oauth/v2/token/revoke", post(revoke_endpoint))
            .with_state(accounts);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        url
    }

    fn test_config(data_dir: &std::path::Path) -> Config {
        Config {
            client_id: Some("1000.client".into()),
            client_secret: Some(common::Secret::new("secret".to_string())),
            region: Region::Us,
            credential_backend: BackendPreference::File,
            redirect_uri: "http://localhost:8400/callback".into(),
            data_dir: data_dir.to_path_buf(),
            passphrase: None,
            quiet: true,
        }
    }

    async fn context(dir: &std::path::Path, accounts: &Accounts) -> AuthContext {
        let url = mock_accounts(accounts.clone()).await;
        AuthContext::new(
            test_config(dir),
            Arc::new(MemoryStore::new()),
            reqwest::Client::new(),
        )
        .with_accounts_url(url)
    }

    #[test]
    fn extracts_bare_code() {
        assert_eq!(extract_code("  1000.abc\n", None).unwrap(), "1000.abc");
    }

    #[test]
    fn extracts_code_from_redirect_url() {
        let url = "http://localhost:8400/callback?state=xyz&code=1000.abc&location=us&accounts-server=https%3A%2F%2Faccounts.zoho.com";
        assert_eq!(extract_code(url, Some("xyz")).unwrap(), "1000.abc");
        assert_eq!(extract_code(url, None).unwrap(), "1000.abc");
    }

    #[test]
    fn rejects_state_mismatch_and_denial() {
        let url = "http://localhost:8400/callback?state=evil&code=1000.abc";
        assert!(extract_code(url, Some("xyz")).is_err());

        let denied = "http://localhost:8400/callback?error=access_denied";
        let err = extract_code(denied, None).unwrap_err();
        assert!(err.to_string().contains("access_denied"));

        assert!(extract_code("   ", None).is_err());
        assert!(extract_code("http://localhost:8400/callback?code=", None).is_err());
    }

    #[test]
    fn redirect_values_are_percent_decoded() {
        let url = "http://localhost:8400/callback?code=1000.a%2Fb%3Dc&state=x%20y";
        assert_eq!(extract_code(url, Some("x y")).unwrap(), "1000.a/b=c");

        // Bare query string without scheme or host
        assert_eq!(extract_code("?code=1000.a%2Bb", None).unwrap(), "1000.a+b");
        assert_eq!(extract_code("code=1000.abc&state=s1", Some("s1")).unwrap(), "1000.abc");
    }

    #[test]
    fn missing_state_is_rejected_when_expected() {
        let url = "http://localhost:8400/callback?code=1000.abc";
        let err = extract_code(url, Some("xyz")).unwrap_err();
        assert!(err.to_string().contains("state"), "got: {err}");
        assert_eq!(extract_code(url, None).unwrap(), "1000.abc");
    }

    #[test]
    fn authorization_url_targets_region() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AuthContext::new(
            test_config(dir.path()),
            Arc::new(MemoryStore::new()),
            reqwest::Client::new(),
        );
        let (url, state) = ctx.authorization_url(Region::Eu).unwrap();
        assert!(url.starts_with("https://accounts.zoho.eu/oauth/v2/auth?"));
        assert!(url.contains(&format!("state={state}")));
        assert!(url.contains("access_type=offline"));
    }

    #[tokio::test]
    async fn login_then_token_uses_cached_access_token() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = Accounts::default();
        let ctx = context(dir.path(), &accounts).await;

        let backend = ctx.login(Region::Us, "1000.good", None).await.unwrap();
        assert_eq!(backend, Backend::Memory);
        assert_eq!(accounts.token_hits.load(Ordering::SeqCst), 1);

        assert_eq!(ctx.token(Region::Us).await.unwrap(), "1000.access");
        assert_eq!(accounts.token_hits.load(Ordering::SeqCst), 1);

        let status = ctx.status(Region::Us).unwrap();
        assert!(status.logged_in);
        assert!(status.cached_expiry.is_some());
    }

    #[tokio::test]
    async fn bad_code_maps_to_api_error() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = Accounts::default();
        let ctx = context(dir.path(), &accounts).await;

        let err = ctx.login(Region::Us, "1000.bad", None).await.unwrap_err();
        assert_eq!(crate::exit::code_for(&err), crate::exit::API);
        assert!(!ctx.status(Region::Us).unwrap().logged_in);
    }

    #[tokio::test]
    async fn token_without_login_maps_to_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = Accounts::default();
        let ctx = context(dir.path(), &accounts).await;

        let err = ctx.token(Region::Us).await.unwrap_err();
        assert_eq!(crate::exit::code_for(&err), crate::exit::AUTH);
        assert_eq!(accounts.token_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logout_revokes_then_clears() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = Accounts::default();
        let ctx = context(dir.path(), &accounts).await;
        ctx.login(Region::Us, "1000.good", None).await.unwrap();

        assert!(ctx.logout(Region::Us).await.unwrap());
        assert_eq!(accounts.revoke_hits.load(Ordering::SeqCst), 1);
        assert!(!ctx.status(Region::Us).unwrap().logged_in);
        assert!(!dir.path().join("token_us.json").exists());

        // Second logout has nothing to revoke
        assert!(!ctx.logout(Region::Us).await.unwrap());
        assert_eq!(accounts.revoke_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logout_all_clears_despite_revoke_failure() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = Accounts {
            revoke_fails: true,
            ..Default::default()
        };
        let ctx = context(dir.path(), &accounts).await;
        ctx.login(Region::Us, "1000.good", None).await.unwrap();
        ctx.login(Region::Jp, "1000.good", None).await.unwrap();

        let cleared = ctx.logout_all().await.unwrap();
        assert_eq!(cleared, vec![Region::Us, Region::Jp]);
        assert_eq!(accounts.revoke_hits.load(Ordering::SeqCst), 2);
        for region in Region::ALL {
            assert!(!ctx.status(region).unwrap().logged_in);
        }
    }
}
