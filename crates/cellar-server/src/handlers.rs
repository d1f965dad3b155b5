use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header::LOCATION},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};

use cellar_auth::TokenStatus;

use crate::cache::CacheMode;
use crate::error::ApiError;
use crate::proxy::{Cached, cached_read};
use crate::server::AppState;

/// Cache key of the item list.
pub const PRODUCTS_KEY: &str = "products";
/// Cache key of the organization profile.
pub const ORGANIZATION_KEY: &str = "organization";

/// Cache key of a single item.
pub fn product_key(id: &str) -> String {
    format!("{PRODUCTS_KEY}:{id}")
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// `degraded` while Zoho rejected the refresh token or the configured Redis
/// is unreachable; otherwise `ok`.
fn health_status(token: TokenStatus, cache: CacheMode) -> &'static str {
    if token == TokenStatus::Broken || cache == CacheMode::Disabled {
        "degraded"
    } else {
        "ok"
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let token = state.tokens.status();
    let cache = state.cache.stats();
    Json(json!({
        "status": health_status(token, cache.mode),
        "authenticated": state.tokens.is_authenticated(),
        "token": token,
        "uptime": state.started_at.elapsed().as_secs_f64(),
        "cache": cache,
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("GIT_COMMIT"),
    }))
}

// ---------------------------------------------------------------------------
// OAuth
// ---------------------------------------------------------------------------

/// Redirects the operator to the Zoho consent page.
pub async fn authorize(State(state): State<AppState>) -> impl IntoResponse {
    let url = state.tokens.authorization_url();
    tracing::info!("redirecting to Zoho consent page");
    (StatusCode::FOUND, [(LOCATION, url.to_string())])
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
}

/// Completes the authorization-code flow.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<Value>, ApiError> {
    if let Some(error) = params.error.as_deref() {
        tracing::warn!(error, "Zoho consent was not granted");
        return Err(ApiError::BadRequest(format!(
            "Zoho authorization was denied: {error}"
        )));
    }

    let code = params
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing authorization code".into()))?;

    state
        .tokens
        .exchange_authorization_code(code)
        .await
        .map_err(ApiError::Authorization)?;

    Ok(Json(json!({
        "ok": true,
        "message": "Zoho authorization complete",
    })))
}

pub async fn auth_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "authenticated": state.tokens.is_authenticated(),
        "status": state.tokens.status(),
    }))
}

// ---------------------------------------------------------------------------
// Zoho Books proxy
// ---------------------------------------------------------------------------

pub async fn list_products(State(state): State<AppState>) -> Result<Cached<Value>, ApiError> {
    let books = state.books.clone();
    cached_read(
        &state.cache,
        &state.tokens,
        PRODUCTS_KEY,
        Duration::from_secs(state.config.cache.products_ttl_secs),
        |token| async move { books.list_items(&token).await },
    )
    .await
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Cached<Value>, ApiError> {
    let id = validate_item_id(&id)?;
    let books = state.books.clone();
    cached_read(
        &state.cache,
        &state.tokens,
        &product_key(&id),
        Duration::from_secs(state.config.cache.product_ttl_secs),
        |token| async move { books.get_item(&token, &id).await },
    )
    .await
}

pub async fn get_organization(State(state): State<AppState>) -> Result<Cached<Value>, ApiError> {
    let books = state.books.clone();
    cached_read(
        &state.cache,
        &state.tokens,
        ORGANIZATION_KEY,
        Duration::from_secs(state.config.cache.organization_ttl_secs),
        |token| async move { books.get_organization(&token).await },
    )
    .await
}

/// Updates an item upstream, then drops the cached list and item.
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(changes): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let id = validate_item_id(&id)?;
    if !changes.is_object() {
        return Err(ApiError::BadRequest(
            "request body must be a JSON object".into(),
        ));
    }

    let token = state.tokens.valid_access_token().await?;
    let item = state.books.update_item(&token, &id, &changes).await?;

    state.cache.del(PRODUCTS_KEY);
    state.cache.del(&product_key(&id));
    tracing::info!(item_id = %id, "item updated; cache invalidated");

    Ok(Json(item))
}

/// Zoho item ids are numeric; anything path-like is rejected before it reaches
/// an upstream URL or a cache key.
fn validate_item_id(id: &str) -> Result<String, ApiError> {
    let id = id.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ApiError::BadRequest(format!("invalid item id {id:?}")));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_key() {
        assert_eq!(product_key("460000000012345"), "products:460000000012345");
    }

    #[test]
    fn test_health_status() {
        assert_eq!(health_status(TokenStatus::Fresh, CacheMode::Redis), "ok");
        assert_eq!(health_status(TokenStatus::Unauthenticated, CacheMode::Memory), "ok");
        assert_eq!(health_status(TokenStatus::Broken, CacheMode::Memory), "degraded");
        assert_eq!(health_status(TokenStatus::Fresh, CacheMode::Disabled), "degraded");
    }

    #[test]
    fn test_validate_item_id() {
        assert_eq!(validate_item_id(" 4600 ").unwrap(), "4600");
        assert!(validate_item_id("").is_err());
        assert!(validate_item_id("../organizations").is_err());
        assert!(validate_item_id("1?x=y").is_err());
    }
}
