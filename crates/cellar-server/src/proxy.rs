//! Cache-aside composition of [`CacheStore`], [`TokenManager`] and a Zoho call.
//!
//! ```text
//! cache hit  ─────────────────────────────────────────────▶ respond (HIT)
//! cache miss ─▶ valid_access_token ─▶ Zoho ─▶ spawn cache write ─▶ respond (MISS)
//! ```

use std::future::Future;
use std::time::Duration;

use axum::{
    Json,
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use cellar_auth::TokenManager;
use serde::{Serialize, de::DeserializeOwned};

use crate::cache::CacheStore;
use crate::error::ApiError;
use crate::zoho::ZohoApiError;

pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// A value tagged with its cache provenance. Renders as JSON with an
/// `X-Cache` header.
#[derive(Debug)]
pub struct Cached<T> {
    pub value: T,
    pub status: CacheStatus,
}

impl<T: Serialize> IntoResponse for Cached<T> {
    fn into_response(self) -> Response {
        let mut response = Json(self.value).into_response();
        response.headers_mut().insert(
            HeaderName::from_static(CACHE_STATUS_HEADER),
            HeaderValue::from_static(self.status.as_str()),
        );
        response
    }
}

/// Serves `key` from the cache, or fetches it with a valid access token and
/// writes it back for `ttl`.
///
/// Token failures surface as 401, Zoho failures as 502. Cache failures only
/// turn hits into misses.
pub async fn cached_read<T, F, Fut>(
    cache: &CacheStore,
    tokens: &TokenManager,
    key: &str,
    ttl: Duration,
    fetch: F,
) -> Result<Cached<T>, ApiError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T, ZohoApiError>>,
{
    if let Some(value) = cache.get::<T>(key).await {
        return Ok(Cached {
            value,
            status: CacheStatus::Hit,
        });
    }

    let token = tokens.valid_access_token().await?;
    let value = fetch(token).await.map_err(|e| {
        tracing::warn!(key = %key, error = %e, "Zoho fetch failed");
        ApiError::Upstream(e)
    })?;

    cache.set(key, &value, ttl);
    Ok(Cached {
        value,
        status: CacheStatus::Miss,
    })
}
