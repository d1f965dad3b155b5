//! Zoho Books API client.
//!
//! Every call carries `Authorization: Zoho-oauthtoken {token}` and the
//! `organization_id` query parameter. Zoho wraps payloads in an envelope
//! with a numeric `code`; anything but `0` is a failure even on HTTP 200.

use cellar_auth::ZohoOAuthConfig;
use reqwest::{Method, StatusCode};
use serde_json::Value;

/// Longest upstream body fragment quoted in error messages.
const ERROR_SNIPPET_CHARS: usize = 240;

/// Zoho Books call failure.
#[derive(Debug, thiserror::Error)]
pub enum ZohoApiError {
    /// Zoho answered with an error envelope or a non-success status.
    #[error("Zoho Books returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// The request did not complete.
    #[error("Zoho Books request failed: {0}")]
    Transport(String),

    /// The envelope was missing the expected payload.
    #[error("Zoho Books response malformed: {0}")]
    Malformed(String),
}

impl ZohoApiError {
    /// HTTP status Zoho answered with, if it answered at all.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Client for `https://www.zohoapis.{tld}/books/v3`.
#[derive(Clone)]
pub struct BooksClient {
    http: reqwest::Client,
    base_url: String,
    organization_id: String,
}

impl std::fmt::Debug for BooksClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BooksClient")
            .field("base_url", &self.base_url)
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

impl BooksClient {
    pub fn new(config: &ZohoOAuthConfig) -> Result<Self, ZohoApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("cellar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ZohoApiError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.api_base().to_string(),
            organization_id: config.organization_id.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /items`
    pub async fn list_items(&self, token: &str) -> Result<Value, ZohoApiError> {
        let body = self.send(Method::GET, "items", token, None).await?;
        take_field(body, "items")
    }

    /// `GET /items/{id}`
    pub async fn get_item(&self, token: &str, item_id: &str) -> Result<Value, ZohoApiError> {
        let body = self
            .send(Method::GET, &format!("items/{item_id}"), token, None)
            .await?;
        take_field(body, "item")
    }

    /// `PUT /items/{id}`
    pub async fn update_item(
        &self,
        token: &str,
        item_id: &str,
        changes: &Value,
    ) -> Result<Value, ZohoApiError> {
        let body = self
            .send(Method::PUT, &format!("items/{item_id}"), token, Some(changes))
            .await?;
        take_field(body, "item")
    }

    /// `GET /organizations/{organization_id}`
    pub async fn get_organization(&self, token: &str) -> Result<Value, ZohoApiError> {
        let path = format!("organizations/{}", self.organization_id);
        let body = self.send(Method::GET, &path, token, None).await?;
        take_field(body, "organization")
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        token: &str,
        json: Option<&Value>,
    ) -> Result<Value, ZohoApiError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Zoho-oauthtoken {token}"),
            )
            .query(&[("organization_id", self.organization_id.as_str())]);
        if let Some(json) = json {
            request = request.json(json);
        }

        let started = std::time::Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ZohoApiError::Transport(format!("{method} {path} timed out"))
            } else {
                ZohoApiError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ZohoApiError::Transport(format!("failed to read response: {e}")))?;

        tracing::debug!(
            http.method = %method,
            zoho.path = %path,
            http.status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Zoho Books call"
        );

        parse_envelope(status, &text)
    }
}

/// Checks the Zoho envelope and returns the parsed body.
fn parse_envelope(status: StatusCode, text: &str) -> Result<Value, ZohoApiError> {
    let body: Option<Value> = serde_json::from_str(text).ok();
    let code = body.as_ref().and_then(|b| b.get("code")).and_then(Value::as_i64);
    let message = body
        .as_ref()
        .and_then(|b| b.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string);

    if !status.is_success() || code.is_some_and(|c| c != 0) {
        return Err(ZohoApiError::Api {
            status: status.as_u16(),
            code,
            message: message.unwrap_or_else(|| snippet(text)),
        });
    }

    body.ok_or_else(|| ZohoApiError::Malformed(format!("invalid JSON: {}", snippet(text))))
}

fn take_field(mut body: Value, field: &str) -> Result<Value, ZohoApiError> {
    body.get_mut(field)
        .map(Value::take)
        .ok_or_else(|| ZohoApiError::Malformed(format!("missing `{field}`")))
}

fn snippet(text: &str) -> String {
    text.chars().take(ERROR_SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let body = json!({"code": 0, "message": "success", "items": [{"item_id": "1"}]});
        let parsed = parse_envelope(StatusCode::OK, &body.to_string()).unwrap();
        assert_eq!(take_field(parsed, "items").unwrap(), json!([{"item_id": "1"}]));
    }

    #[test]
    fn test_nonzero_code_on_200_is_error() {
        let body = json!({"code": 1002, "message": "Item does not exist."});
        let err = parse_envelope(StatusCode::OK, &body.to_string()).unwrap_err();
        match err {
            ZohoApiError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 200);
                assert_eq!(code, Some(1002));
                assert_eq!(message, "Item does not exist.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_http_error_without_json() {
        let err = parse_envelope(StatusCode::SERVICE_UNAVAILABLE, "maintenance").unwrap_err();
        assert_eq!(err.upstream_status(), Some(503));
        assert!(err.to_string().contains("maintenance"));
    }

    #[test]
    fn test_missing_payload_field() {
        let err = take_field(json!({"code": 0}), "organization").unwrap_err();
        assert!(matches!(err, ZohoApiError::Malformed(_)));
    }

    #[test]
    fn test_base_url_from_region() {
        let config = ZohoOAuthConfig {
            region: cellar_auth::ZohoRegion::Eu,
            ..Default::default()
        };
        let client = BooksClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://www.zohoapis.eu/books/v3");
    }
}
