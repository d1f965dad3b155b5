//! OAuth token lifecycle.
//!
//! - [`TokenManager`] - owns the credential state and is the only way callers
//!   obtain an access token
//! - [`TokenEndpoint`] - thin client for the Zoho accounts token endpoint
//! - [`Credentials`] / [`TokenStatus`] - snapshots of the credential state

pub mod exchange;
pub mod manager;
pub mod schedule;

pub use exchange::{TokenEndpoint, TokenGrant};
pub use manager::TokenManager;
pub use schedule::refresh_delay;

use serde::Serialize;
use std::fmt;

/// Snapshot of the credential state held by [`TokenManager`].
///
/// `expires_at` is in epoch milliseconds and is zero whenever
/// `access_token` is absent.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
}

impl Credentials {
    /// True iff both tokens are present.
    pub fn is_complete(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }

    /// True while the access token can be handed out, i.e.
    /// `now_ms < expires_at - buffer_ms`.
    pub fn is_fresh(&self, now_ms: i64, buffer_ms: i64) -> bool {
        self.access_token.is_some() && now_ms < self.expires_at.saturating_sub(buffer_ms)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.as_deref().map(mask_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask_token))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Coarse state of the credential state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// No refresh token held.
    Unauthenticated,
    /// A refresh token was restored from storage but no access token has been
    /// minted with it yet.
    Restored,
    /// Access token usable.
    Fresh,
    /// Access token inside the refresh buffer; the next caller refreshes it.
    Stale,
    /// The accounts server rejected the refresh token. Needs re-authorization.
    Broken,
}

/// Masks a token for logging, keeping only the first and last four characters.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}
