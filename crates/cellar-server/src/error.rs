//! HTTP-facing errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cellar_auth::AuthError;
use serde_json::json;

use crate::zoho::ZohoApiError;

/// Route the operator is sent to when the service holds no usable token.
pub const AUTHORIZE_PATH: &str = "/auth/zoho";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request (400).
    #[error("{0}")]
    BadRequest(String),

    /// No usable Zoho token (401).
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The authorization-code exchange at the callback failed (500).
    #[error("Zoho authorization failed: {0}")]
    Authorization(AuthError),

    /// Zoho Books failed after a valid token was obtained (502).
    #[error(transparent)]
    Upstream(#[from] ZohoApiError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(AuthError::NotAuthenticated | AuthError::UpstreamAuth { .. }) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Auth(_) | Self::Authorization(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn kind(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST => "bad_request",
            StatusCode::UNAUTHORIZED => "unauthorized",
            StatusCode::BAD_GATEWAY => "upstream_error",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if status == StatusCode::UNAUTHORIZED {
            body["authorize_url"] = json!(AUTHORIZE_PATH);
        }

        (status, Json(body)).into_response()
    }
}
