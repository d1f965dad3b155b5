//! OAuth client and refresh-policy configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [zoho]
//! client_id = "1000.XXXX"
//! client_secret = "..."
//! redirect_uri = "https://shop.example.com/auth/zoho/callback"
//! organization_id = "123456789"
//! region = "eu"
//!
//! [token]
//! refresh_buffer = "5m"
//! minimum_refresh_delay = "10s"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AuthError;

/// Default OAuth scope requested from Zoho.
pub const DEFAULT_SCOPE: &str = "ZohoBooks.fullaccess.all";

/// Zoho data-center region. Each region has its own accounts server and API
/// host; tokens minted in one region are not valid in another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ZohoRegion {
    /// United States (`zoho.com`).
    #[default]
    #[serde(rename = "com", alias = "us")]
    Us,
    /// Europe (`zoho.eu`).
    #[serde(rename = "eu")]
    Eu,
    /// India (`zoho.in`).
    #[serde(rename = "in")]
    India,
    /// Australia (`zoho.com.au`).
    #[serde(rename = "com.au", alias = "au")]
    Australia,
    /// Japan (`zoho.jp`).
    #[serde(rename = "jp")]
    Japan,
    /// Canada (`zohocloud.ca`).
    #[serde(rename = "ca")]
    Canada,
    /// China (`zoho.com.cn`).
    #[serde(rename = "com.cn", alias = "cn")]
    China,
    /// Saudi Arabia (`zoho.sa`).
    #[serde(rename = "sa")]
    SaudiArabia,
}

impl ZohoRegion {
    /// All supported regions.
    pub const ALL: &'static [ZohoRegion] = &[
        Self::Us,
        Self::Eu,
        Self::India,
        Self::Australia,
        Self::Japan,
        Self::Canada,
        Self::China,
        Self::SaudiArabia,
    ];

    /// The domain suffix used in configuration (`com`, `eu`, ...).
    pub fn domain(self) -> &'static str {
        match self {
            Self::Us => "com",
            Self::Eu => "eu",
            Self::India => "in",
            Self::Australia => "com.au",
            Self::Japan => "jp",
            Self::Canada => "ca",
            Self::China => "com.cn",
            Self::SaudiArabia => "sa",
        }
    }

    /// Base URL of the accounts (OAuth) server for this region.
    pub fn accounts_url(self) -> &'static str {
        match self {
            Self::Us => "https://accounts.zoho.com",
            Self::Eu => "https://accounts.zoho.eu",
            Self::India => "https://accounts.zoho.in",
            Self::Australia => "https://accounts.zoho.com.au",
            Self::Japan => "https://accounts.zoho.jp",
            Self::Canada => "https://accounts.zohocloud.ca",
            Self::China => "https://accounts.zoho.com.cn",
            Self::SaudiArabia => "https://accounts.zoho.sa",
        }
    }

    /// Base URL of the Zoho Books v3 API for this region.
    pub fn books_api_url(self) -> &'static str {
        match self {
            Self::Us => "https://www.zohoapis.com/books/v3",
            Self::Eu => "https://www.zohoapis.eu/books/v3",
            Self::India => "https://www.zohoapis.in/books/v3",
            Self::Australia => "https://www.zohoapis.com.au/books/v3",
            Self::Japan => "https://www.zohoapis.jp/books/v3",
            Self::Canada => "https://www.zohoapis.ca/books/v3",
            Self::China => "https://www.zohoapis.com.cn/books/v3",
            Self::SaudiArabia => "https://www.zohoapis.sa/books/v3",
        }
    }
}

impl fmt::Display for ZohoRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.domain())
    }
}

impl FromStr for ZohoRegion {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "com" | "us" => Ok(Self::Us),
            "eu" => Ok(Self::Eu),
            "in" => Ok(Self::India),
            "com.au" | "au" => Ok(Self::Australia),
            "jp" => Ok(Self::Japan),
            "ca" => Ok(Self::Canada),
            "com.cn" | "cn" => Ok(Self::China),
            "sa" => Ok(Self::SaudiArabia),
            other => Err(AuthError::configuration(format!(
                "unknown Zoho region '{other}'"
            ))),
        }
    }
}

/// OAuth client registration for the Zoho accounts server.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ZohoOAuthConfig {
    /// Client id from the Zoho API console.
    pub client_id: String,

    /// Client secret from the Zoho API console.
    pub client_secret: String,

    /// Redirect URI registered for the client; must point at
    /// `/auth/zoho/callback` of this service.
    pub redirect_uri: String,

    /// Zoho Books organization the service reads from.
    pub organization_id: String,

    /// Data-center region.
    pub region: ZohoRegion,

    /// Requested OAuth scope.
    pub scope: String,

    /// Overrides the regional accounts server URL (tests, proxies).
    pub accounts_url: Option<String>,

    /// Overrides the regional Books API URL (tests, proxies).
    pub api_url: Option<String>,

    /// Timeout for calls to the accounts server and the Books API.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ZohoOAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:3001/auth/zoho/callback".to_string(),
            organization_id: String::new(),
            region: ZohoRegion::default(),
            scope: DEFAULT_SCOPE.to_string(),
            accounts_url: None,
            api_url: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for ZohoOAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZohoOAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("organization_id", &self.organization_id)
            .field("region", &self.region)
            .field("scope", &self.scope)
            .field("accounts_url", &self.accounts_url)
            .field("api_url", &self.api_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ZohoOAuthConfig {
    /// Accounts server base URL, honoring the override.
    pub fn accounts_base(&self) -> &str {
        self.accounts_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or_else(|| self.region.accounts_url())
    }

    /// Books API base URL, honoring the override.
    pub fn api_base(&self) -> &str {
        self.api_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or_else(|| self.region.books_api_url())
    }

    /// Checks that the fields needed for the OAuth flow are present.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::configuration("zoho.client_id must not be empty"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(AuthError::configuration(
                "zoho.client_secret must not be empty",
            ));
        }
        if url::Url::parse(&self.redirect_uri).is_err() {
            return Err(AuthError::configuration(
                "zoho.redirect_uri must be an absolute URL",
            ));
        }
        if self.scope.trim().is_empty() {
            return Err(AuthError::configuration("zoho.scope must not be empty"));
        }
        if self.request_timeout.is_zero() {
            return Err(AuthError::configuration(
                "zoho.request_timeout must be > 0",
            ));
        }
        Ok(())
    }
}

/// When to consider an access token stale and how to schedule proactive refresh.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Margin subtracted from the real expiry. A token inside this window is
    /// treated as stale and refreshed before use.
    #[serde(with = "humantime_serde")]
    pub refresh_buffer: Duration,

    /// Lower bound on the proactive refresh delay.
    #[serde(with = "humantime_serde")]
    pub minimum_refresh_delay: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(5 * 60),
            minimum_refresh_delay: Duration::from_secs(10),
        }
    }
}
