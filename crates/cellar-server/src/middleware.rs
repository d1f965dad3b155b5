use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use cellar_auth::{AuthError, TokenStatus};
use uuid::Uuid;

use crate::error::ApiError;
use crate::server::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

// Request ID middleware: propagate incoming x-request-id or generate a new one.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);

    // If the incoming request already has a request-id, preserve it; otherwise generate one
    let req_id_value = match req.headers().get(&header_name) {
        Some(value) => value.clone(),
        None => HeaderValue::try_from(Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    };

    // Add to request extensions for downstream usage (e.g., logging)
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

/// Rejects `/api/*` requests with 401 until Zoho authorization completed.
///
/// A restored refresh token is let through: the handler's first
/// `valid_access_token` call mints the access token, or answers 401 if Zoho
/// refuses.
pub async fn require_zoho_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let status = state.tokens.status();
    if matches!(status, TokenStatus::Unauthenticated | TokenStatus::Broken) {
        tracing::debug!(
            path = %req.uri().path(),
            status = ?status,
            "rejecting API call without Zoho authorization"
        );
        return ApiError::Auth(AuthError::NotAuthenticated).into_response();
    }
    next.run(req).await
}
