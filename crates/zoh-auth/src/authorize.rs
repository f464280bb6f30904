//! Authorization URL construction for the manual login flow
//!
//! The provider wants scopes joined with commas rather than spaces, and
//! only issues a refresh token when asked for offline access with an
//! explicit consent prompt.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;

use crate::region::Region;

/// Generate a random opaque `state` value for CSRF protection.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the full authorization URL for `region`.
pub fn build_authorization_url(
    region: Region,
    client_id: &str,
    scopes: &[&str],
    redirect_uri: &str,
    state: &str,
) -> String {
    format!(
        "{}?client_id={}&response_type=code&redirect_uri={}&scope={}&access_type=offline&prompt=consent&state={}",
        region.authorize_url(),
        urlencoded(client_id),
        urlencoded(redirect_uri),
        urlencoded(&scopes.join(",")),
        urlencoded(state),
    )
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
