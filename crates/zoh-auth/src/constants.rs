//! OAuth constants for the Zoho accounts server
//!
//! Client id and secret are per-installation and come from configuration;
//! only the provider-wide values live here.

/// Scopes requested at login, in the provider's comma-separated form.
/// Covers mail and organization administration; narrower scopes make the
/// admin commands fail with 403 rather than at login.
pub const DEFAULT_SCOPES: &[&str] = &[
    "ZohoMail.accounts.ALL",
    "ZohoMail.folders.ALL",
    "ZohoMail.messages.ALL",
    "ZohoMail.organization.accounts.ALL",
    "ZohoMail.organization.domains.ALL",
    "ZohoMail.organization.groups.ALL",
];

/// Redirect URI used when configuration doesn't name one
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8400/callback";

/// Cached access tokens within this window of expiry are refreshed.
pub const REFRESH_THRESHOLD_SECS: i64 = 5 * 60;

/// Upper bound on waiting for another process's token lock.
pub const LOCK_TIMEOUT_SECS: u64 = 5;

/// Delay between lock attempts.
pub const LOCK_POLL_MILLIS: u64 = 100;

/// Request timeout for token endpoint calls.
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Service name under which keyring entries are stored.
pub const KEYRING_SERVICE: &str = "zoh-cli";
