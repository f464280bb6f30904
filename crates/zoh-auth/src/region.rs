//! Data-centre regions and the endpoints they expose
//!
//! Every API call and every piece of persisted credential state is keyed by
//! region. Cache, lock and secret names derive from the lowercase code so
//! two regions never share a file or a store entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One of the provider's eight data centres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Us,
    Eu,
    In,
    Au,
    Jp,
    Ca,
    Sa,
    Uk,
}

/// Base URLs for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionEndpoints {
    pub accounts_url: &'static str,
    pub api_base: &'static str,
    pub mail_base: &'static str,
}

impl Region {
    pub const ALL: [Region; 8] = [
        Region::Us,
        Region::Eu,
        Region::In,
        Region::Au,
        Region::Jp,
        Region::Ca,
        Region::Sa,
        Region::Uk,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Eu => "eu",
            Region::In => "in",
            Region::Au => "au",
            Region::Jp => "jp",
            Region::Ca => "ca",
            Region::Sa => "sa",
            Region::Uk => "uk",
        }
    }

    pub fn endpoints(self) -> RegionEndpoints {
        let (accounts_url, api_base, mail_base) = match self {
            Region::Us => (
                "https://accounts.zoho.com",
                "https://www.zohoapis.com",
                "https://mail.zoho.com",
            ),
            Region::Eu => (
                "https://accounts.zoho.eu",
                "https://www.zohoapis.eu",
                "https://mail.zoho.eu",
            ),
            Region::In => (
                "https://accounts.zoho.in",
                "https://www.zohoapis.in",
                "https://mail.zoho.in",
            ),
            Region::Au => (
                "https://accounts.zoho.com.au",
                "https://www.zohoapis.com.au",
                "https://mail.zoho.com.au",
            ),
            Region::Jp => (
                "https://accounts.zoho.jp",
                "https://www.zohoapis.jp",
                "https://mail.zoho.jp",
            ),
            Region::Ca => (
                "https://accounts.zohocloud.ca",
                "https://www.zohoapis.ca",
                "https://mail.zohocloud.ca",
            ),
            Region::Sa => (
                "https://accounts.zoho.sa",
                "https://www.zohoapis.sa",
                "https://mail.zoho.sa",
            ),
            Region::Uk => (
                "https://accounts.zoho.uk",
                "https://www.zohoapis.uk",
                "https://mail.zoho.uk",
            ),
        };
        RegionEndpoints {
            accounts_url,
            api_base,
            mail_base,
        }
    }

    /// Token endpoint used for code exchange and refresh.
    pub fn token_url(self) -> String {
        format!("{}/oauth/v2/token", self.endpoints().accounts_url)
    }

    pub fn authorize_url(self) -> String {
        format!("{}/oauth/v2/auth", self.endpoints().accounts_url)
    }

    pub fn revoke_url(self) -> String {
        format!("{}/oauth/v2/token/revoke", self.endpoints().accounts_url)
    }

    /// Secret-store key holding this region's refresh token.
    pub fn refresh_token_key(self) -> String {
        format!("refresh_token_{}", self.code())
    }

    pub fn cache_file_name(self) -> String {
        format!("token_{}.json", self.code())
    }

    pub fn lock_file_name(self) -> String {
        format!("token_{}.lock", self.code())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Region::ALL
            .into_iter()
            .find(|r| r.code() == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = Region::ALL.iter().map(|r| r.code()).collect();
                Error::Config(format!(
                    "unknown region {s:?}, expected one of: {}",
                    valid.join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codes_case_insensitively() {
        assert_eq!("EU".parse::<Region>().unwrap(), Region::Eu);
        assert_eq!(" jp ".parse::<Region>().unwrap(), Region::Jp);
        for region in Region::ALL {
            assert_eq!(region.code().parse::<Region>().unwrap(), region);
        }
    }

    #[test]
    fn unknown_code_lists_valid_regions() {
        let err = "mars".parse::<Region>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("mars"));
        assert!(msg.contains("us, eu, in, au, jp, ca, sa, uk"), "got: {msg}");
    }

    #[test]
    fn derived_urls_use_accounts_host() {
        assert_eq!(Region::Us.token_url(), "https://accounts.zoho.com/oauth/v2/token");
        assert_eq!(Region::Au.authorize_url(), "https://accounts.zoho.com.au/oauth/v2/auth");
        assert_eq!(
            Region::Ca.revoke_url(),
            "https://accounts.zohocloud.ca/oauth/v2/token/revoke"
        );
        assert_eq!(Region::In.endpoints().mail_base, "https://mail.zoho.in");
    }

    #[test]
    fn namespacing_is_per_region() {
        assert_eq!(Region::Eu.refresh_token_key(), "refresh_token_eu");
        assert_eq!(Region::Eu.cache_file_name(), "token_eu.json");
        assert_eq!(Region::Eu.lock_file_name(), "token_eu.lock");
        assert_ne!(Region::Us.cache_file_name(), Region::Uk.cache_file_name());
    }

    #[test]
    fn serde_uses_lowercase_code() {
        assert_eq!(serde_json::to_string(&Region::Sa).unwrap(), "\"sa\"");
        let parsed: Region = serde_json::from_str("\"uk\"").unwrap();
        assert_eq!(parsed, Region::Uk);
    }
}
