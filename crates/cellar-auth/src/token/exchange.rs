//! Zoho accounts token endpoint (`authorization_code` and `refresh_token` grants).

use serde::Deserialize;
use serde_json::Value;

use crate::config::ZohoOAuthConfig;
use crate::error::AuthError;

/// Lifetime assumed when the accounts server omits or garbles `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Longest upstream body fragment quoted in error messages.
const ERROR_SNIPPET_CHARS: usize = 240;

/// Tokens returned by one successful grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present on code exchange; Zoho omits it on refresh.
    pub refresh_token: Option<String>,
    pub expires_in_secs: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<Value>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Client for `{accounts}/oauth/v2/token`.
#[derive(Clone)]
pub struct TokenEndpoint {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl TokenEndpoint {
    /// Builds the endpoint client from the OAuth configuration.
    pub fn new(config: &ZohoOAuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("cellar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(http, config))
    }

    /// Builds the endpoint around an existing HTTP client.
    pub fn with_client(http: reqwest::Client, config: &ZohoOAuthConfig) -> Self {
        Self {
            http,
            token_url: format!("{}/oauth/v2/token", config.accounts_base()),
            client_id: config.client_id.trim().to_string(),
            client_secret: config.client_secret.trim().to_string(),
            redirect_uri: config.redirect_uri.trim().to_string(),
        }
    }

    /// The token endpoint URL.
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Trades a one-time authorization code for an access + refresh token.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code", code.trim()),
        ];
        self.post(&form, "authorization code exchange").await
    }

    /// Trades a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token.trim()),
        ];
        self.post(&form, "token refresh").await
    }

    async fn post(&self, form: &[(&str, &str)], what: &str) -> Result<TokenGrant, AuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::upstream_auth(format!("{what} timed out"))
                } else {
                    AuthError::upstream_auth(format!("{what} request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::upstream_auth(format!("{what} response read failed: {e}")))?;

        parse_token_response(status, &body, what)
    }
}

/// Interprets a token endpoint response.
///
/// Zoho reports rejected grants with HTTP 200 and an `error` field, so the
/// body is checked for `error` before the status code is trusted.
fn parse_token_response(
    status: reqwest::StatusCode,
    body: &str,
    what: &str,
) -> Result<TokenGrant, AuthError> {
    let parsed: Option<TokenResponse> = serde_json::from_str(body).ok();

    if let Some(error) = parsed.as_ref().and_then(|r| r.error.as_deref()) {
        let detail = parsed
            .as_ref()
            .and_then(|r| r.error_description.as_deref())
            .unwrap_or(error);
        return Err(AuthError::upstream_auth_with_code(
            format!("{what} rejected: {}", snippet(detail)),
            error,
        ));
    }

    if !status.is_success() {
        return Err(AuthError::upstream_auth(format!(
            "{what} returned status={} body={}",
            status.as_u16(),
            snippet(body)
        )));
    }

    let parsed = parsed.ok_or_else(|| {
        AuthError::upstream_auth(format!("{what} returned invalid JSON: {}", snippet(body)))
    })?;

    let access_token = parsed
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::upstream_auth(format!("{what} response missing access_token")))?
        .to_string();

    let refresh_token = parsed
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let expires_in_secs = parsed
        .expires_in
        .as_ref()
        .and_then(parse_u64_lossy)
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

    Ok(TokenGrant {
        access_token,
        refresh_token,
        expires_in_secs,
    })
}

fn parse_u64_lossy(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(ERROR_SNIPPET_CHARS).collect()
}
