//! Zoho OAuth credential management
//!
//! Owns the full token lifecycle for the `zoh` CLI: building the consent
//! URL, exchanging authorization codes, storing the refresh token in the
//! best available secret backend, and handing out access tokens that are
//! refreshed at most once across concurrent processes.
//!
//! Credential flow:
//! 1. CLI builds the consent URL via `authorize::build_authorization_url()`
//! 2. Code exchanged with `token::exchange_code()`
//! 3. Tokens seeded via `cache::TokenCache::save_initial_tokens()`
//! 4. Every API call obtains a token through `cache::TokenCache::token()`,
//!    which refreshes under the region's lock file when near expiry
//! 5. Logout revokes with `token::revoke_token()` and clears state via
//!    `cache::TokenCache::clear_tokens()`
//!
//! The refresh token lives in a [`store::SecretStore`] chosen by
//! [`store::open_store()`]: the OS keyring when it works, otherwise an
//! AES-256-GCM encrypted file.

pub mod authorize;
pub mod cache;
pub mod constants;
pub mod environment;
pub mod error;
pub mod lock;
pub mod notice;
pub mod region;
pub mod store;
pub mod token;

pub use authorize::{build_authorization_url, generate_state};
pub use cache::{AccessToken, OAuthToken, TokenCache, TokenStatus};
pub use error::{Error, ErrorKind, Result};
pub use region::Region;
pub use store::{Backend, BackendPreference, SecretStore, StoreOptions, open_store};
pub use token::{ClientCredentials, TokenResponse, exchange_code, http_client, revoke_token};
