//! Token endpoint calls
//!
//! Three interactions with the accounts server, all form-encoded POSTs:
//! 1. Authorization code exchange (manual login)
//! 2. Refresh-token grant (the token cache's refresh path)
//! 3. Revocation (logout, best effort)
//!
//! The provider occasionally answers 200 with an error document instead of
//! a token, so success bodies are checked for an `error` field too.

use std::fmt;
use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::HTTP_TIMEOUT_SECS;
use crate::error::{Error, Result};
use crate::region::Region;

/// Error codes meaning the refresh token itself is no longer accepted.
const REVOKED_ERROR_CODES: &[&str] = &["invalid_grant", "invalid_code"];

/// OAuth client registration used for every grant.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Secret::new(client_secret.into()),
        }
    }
}

/// Successful response from the token endpoint.
///
/// `expires_in` is a delta in seconds; the cache converts it to an absolute
/// expiry when storing. `refresh_token` is only present on code exchange or
/// when the provider rotates it.
#[derive(Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_domain: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("api_domain", &self.api_domain)
            .finish()
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error document returned by the token endpoint.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ErrorResponse {
    fn detail(&self) -> String {
        match &self.error_description {
            Some(desc) => format!("{}: {desc}", self.error),
            None => self.error.clone(),
        }
    }
}

/// HTTP client with the token endpoint's request timeout applied.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| Error::Http(format!("building HTTP client: {e}")))
}

/// Exchange an authorization code for tokens (manual login).
pub async fn exchange_code(
    client: &reqwest::Client,
    token_url: &str,
    credentials: &ClientCredentials,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let (status, body) = post_form(
        client,
        token_url,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose().as_str()),
            ("redirect_uri", redirect_uri),
            ("code", code),
        ],
    )
    .await?;

    match parse_token_body(status, &body) {
        Ok(token) => Ok(token),
        Err(Some(err)) => Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {}",
            err.detail()
        ))),
        Err(None) => Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        ))),
    }
}

/// Exchange a refresh token for a new access token.
///
/// `invalid_grant` (and the provider's `invalid_code` variant) become
/// [`Error::TokenRevoked`]; any other rejection is [`Error::RefreshFailed`]
/// with the HTTP status.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    token_url: &str,
    credentials: &ClientCredentials,
    refresh_token: &str,
    region: Region,
) -> Result<TokenResponse> {
    let (status, body) = post_form(
        client,
        token_url,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose().as_str()),
            ("refresh_token", refresh_token),
        ],
    )
    .await?;

    classify_refresh(status, &body, region)
}

/// Revoke a refresh token. Callers treat failure as non-fatal.
pub async fn revoke_token(client: &reqwest::Client, revoke_url: &str, token: &str) -> Result<()> {
    let response = client
        .post(revoke_url)
        .query(&[("token", token)])
        .send()
        .await
        .map_err(transport_error)?;
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Http(format!("revoke returned {status}: {body}")));
    }
    debug!("token revoked");
    Ok(())
}

async fn post_form(
    client: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
) -> Result<(u16, String)> {
    let response = client
        .post(url)
        .form(form)
        .send()
        .await
        .map_err(transport_error)?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(transport_error)?;
    debug!(status, "token endpoint responded");
    Ok((status, body))
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("token endpoint: {e}"))
    } else {
        Error::Http(format!("token endpoint request failed: {e}"))
    }
}

/// `Err(Some(_))` is a provider error document, `Err(None)` an unparseable body.
fn parse_token_body(
    status: u16,
    body: &str,
) -> std::result::Result<TokenResponse, Option<ErrorResponse>> {
    if (200..300).contains(&status) {
        if let Ok(token) = serde_json::from_str::<TokenResponse>(body) {
            return Ok(token);
        }
    }
    Err(serde_json::from_str::<ErrorResponse>(body).ok())
}

fn classify_refresh(status: u16, body: &str, region: Region) -> Result<TokenResponse> {
    match parse_token_body(status, body) {
        Ok(token) => Ok(token),
        Err(Some(err)) if REVOKED_ERROR_CODES.contains(&err.error.as_str()) => {
            Err(Error::TokenRevoked {
                region,
                detail: err.detail(),
            })
        }
        Err(_) if (200..300).contains(&status) => Err(Error::RefreshFailed {
            status,
            body: format!("unexpected token response: {body}"),
        }),
        Err(_) => Err(Error::RefreshFailed {
            status,
            body: body.to_string(),
        }),
    }
}
