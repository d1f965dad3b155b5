//! [`TokenManager`]: the single owner of the Zoho credential state.
//!
//! # State machine
//!
//! ```text
//! Unauthenticated --exchange--> Fresh --time--> Stale --refresh--> Fresh
//!                                                 |
//!                                                 +--rejected--> Broken
//! ```
//!
//! Refresh is both proactive (a one-shot timer armed after every
//! acquisition) and reactive ([`TokenManager::valid_access_token`] refreshes
//! synchronously when the timer was late or never armed).
//!
//! Refreshes are single-flight: concurrent callers that find a refresh in
//! progress wait for it and share its outcome instead of issuing their own
//! request to the accounts server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use url::Url;

use super::exchange::{TokenEndpoint, TokenGrant};
use super::schedule::{RefreshTimer, refresh_delay};
use super::{Credentials, TokenStatus, mask_token, now_millis};
use crate::config::{RefreshPolicy, ZohoOAuthConfig};
use crate::error::AuthError;
use crate::store::TokenStore;

/// Credential state plus the bookkeeping needed to report [`TokenStatus`].
#[derive(Default)]
struct State {
    credentials: Credentials,
    /// Set when the accounts server rejected the stored refresh token.
    rejected: Option<String>,
}

/// Outcome of the most recent acquisition, shared with callers that waited
/// on it.
#[derive(Clone)]
enum Outcome {
    Acquired(Credentials),
    Failed { message: String, code: Option<String> },
}

struct Inner {
    config: ZohoOAuthConfig,
    policy: RefreshPolicy,
    endpoint: TokenEndpoint,
    consent_base: Url,
    state: RwLock<State>,
    /// Serializes exchanges and refreshes against the accounts server.
    acquire_lock: tokio::sync::Mutex<()>,
    /// Bumped (under `acquire_lock`) after every completed acquisition attempt.
    generation: AtomicU64,
    last_outcome: RwLock<Option<Outcome>>,
    timer: RefreshTimer,
    store: Option<Arc<dyn TokenStore>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.timer.cancel();
    }
}

/// Owns OAuth credentials for one Zoho organization and hands out valid
/// access tokens.
///
/// Cheap to clone; all clones share the same state. Construct one per
/// process and pass it to whoever needs tokens.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("client_id", &self.inner.config.client_id)
            .field("status", &self.status())
            .finish()
    }
}

impl TokenManager {
    /// Creates a manager with no credentials.
    pub fn new(config: ZohoOAuthConfig, policy: RefreshPolicy) -> Result<Self, AuthError> {
        let endpoint = TokenEndpoint::new(&config)?;
        Self::with_endpoint(config, policy, endpoint)
    }

    /// Creates a manager around an explicit token endpoint client.
    pub fn with_endpoint(
        config: ZohoOAuthConfig,
        policy: RefreshPolicy,
        endpoint: TokenEndpoint,
    ) -> Result<Self, AuthError> {
        let consent_base = Url::parse(&format!("{}/oauth/v2/auth", config.accounts_base()))
            .map_err(|e| AuthError::configuration(format!("invalid Zoho accounts URL: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                policy,
                endpoint,
                consent_base,
                state: RwLock::new(State::default()),
                acquire_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                last_outcome: RwLock::new(None),
                timer: RefreshTimer::new(),
                store: None,
            }),
        })
    }

    /// Attaches a refresh-token store. Must be called before the manager is
    /// cloned or used.
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.store = Some(store),
            None => tracing::warn!("token store attached to a shared TokenManager; ignored"),
        }
        self
    }

    /// The consent URL the operator is redirected to.
    pub fn authorization_url(&self) -> Url {
        let config = &self.inner.config;
        let mut url = self.inner.consent_base.clone();
        url.query_pairs_mut()
            .append_pair("scope", &config.scope)
            .append_pair("client_id", &config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        url
    }

    /// Trades a one-time authorization code for tokens, stores them and arms
    /// the refresh timer.
    #[tracing::instrument(skip_all)]
    pub async fn exchange_authorization_code(&self, code: &str) -> Result<Credentials, AuthError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::upstream_auth("authorization code is empty"));
        }

        let _guard = self.inner.acquire_lock.lock().await;

        // A failed exchange leaves the state untouched, so only successes
        // are published to callers waiting on the lock.
        let grant = self.inner.endpoint.exchange_code(code).await.map_err(|err| {
            tracing::warn!(error = %err, "Zoho authorization code exchange failed");
            err
        })?;
        if grant.refresh_token.is_none() {
            return Err(AuthError::upstream_auth(
                "code exchange returned no refresh_token (was access_type=offline honored?)",
            ));
        }

        let credentials = self.install(grant);
        tracing::info!(
            expires_at = credentials.expires_at,
            "Zoho authorization completed"
        );
        self.persist(&credentials).await;
        self.finish(Outcome::Acquired(credentials.clone()));
        Ok(credentials)
    }

    /// Trades the stored refresh token for a new access token.
    ///
    /// If another refresh is already running this waits for it and returns
    /// its outcome. Failures are not retried.
    pub async fn refresh_access_token(&self) -> Result<Credentials, AuthError> {
        self.refresh_single_flight(false).await
    }

    /// Returns an access token that is valid for at least the refresh buffer,
    /// refreshing first if needed. The only way API callers obtain a token.
    pub async fn valid_access_token(&self) -> Result<String, AuthError> {
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let credentials = self.refresh_single_flight(true).await?;
        credentials.access_token.ok_or(AuthError::NotAuthenticated)
    }

    /// True iff both the access and refresh tokens are held.
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.read().credentials.is_complete()
    }

    /// Restores a persisted refresh token without validating it. The next
    /// [`valid_access_token`](Self::valid_access_token) call finds out
    /// whether it still works.
    pub fn set_refresh_token(&self, token: impl Into<String>) {
        let token = token.into();
        let mut state = self.inner.state.write();
        if state.credentials.refresh_token.as_deref() != Some(token.as_str()) {
            // A different refresh token invalidates whatever it did not mint.
            state.credentials.access_token = None;
            state.credentials.expires_at = 0;
        }
        state.credentials.refresh_token = Some(token);
        state.rejected = None;
    }

    /// Snapshot of the credential state.
    pub fn credentials(&self) -> Credentials {
        self.inner.state.read().credentials.clone()
    }

    /// Where the state machine currently is.
    pub fn status(&self) -> TokenStatus {
        let state = self.inner.state.read();
        let creds = &state.credentials;
        if creds.refresh_token.is_none() {
            TokenStatus::Unauthenticated
        } else if state.rejected.is_some() {
            TokenStatus::Broken
        } else if creds.access_token.is_none() {
            TokenStatus::Restored
        } else if creds.is_fresh(now_millis(), self.buffer_ms()) {
            TokenStatus::Fresh
        } else {
            TokenStatus::Stale
        }
    }

    /// The error message of the last rejected refresh, if the manager is broken.
    pub fn last_error(&self) -> Option<String> {
        self.inner.state.read().rejected.clone()
    }

    /// True while a proactive refresh is scheduled.
    pub fn refresh_scheduled(&self) -> bool {
        self.inner.timer.is_armed()
    }

    /// Cancels the proactive refresh timer for good. A refresh already in
    /// flight still completes but no longer re-arms the timer.
    pub fn shutdown(&self) {
        self.inner.timer.close();
    }

    fn buffer_ms(&self) -> i64 {
        i64::try_from(self.inner.policy.refresh_buffer.as_millis()).unwrap_or(i64::MAX)
    }

    fn fresh_token(&self) -> Option<String> {
        let state = self.inner.state.read();
        if state.credentials.is_fresh(now_millis(), self.buffer_ms()) {
            state.credentials.access_token.clone()
        } else {
            None
        }
    }

    /// Runs a refresh unless one completed while this caller was waiting.
    ///
    /// With `only_if_stale`, a token that became fresh in the meantime (for
    /// example through a code exchange) is returned without a request.
    async fn refresh_single_flight(&self, only_if_stale: bool) -> Result<Credentials, AuthError> {
        let observed = self.inner.generation.load(Ordering::Acquire);
        let _guard = self.inner.acquire_lock.lock().await;

        let joined = if self.inner.generation.load(Ordering::Acquire) != observed {
            self.inner.last_outcome.read().clone()
        } else {
            None
        };
        if let Some(outcome) = joined {
            tracing::debug!("joined in-flight token acquisition");
            return match outcome {
                Outcome::Acquired(credentials) => Ok(credentials),
                Outcome::Failed { message, code } => Err(AuthError::UpstreamAuth { message, code }),
            };
        }

        if only_if_stale && self.fresh_token().is_some() {
            return Ok(self.credentials());
        }

        let refresh_token = self
            .inner
            .state
            .read()
            .credentials
            .refresh_token
            .clone()
            .ok_or(AuthError::NotAuthenticated)?;

        match self.inner.endpoint.refresh(&refresh_token).await {
            Ok(grant) => {
                let credentials = self.install(grant);
                tracing::info!(
                    expires_at = credentials.expires_at,
                    "Zoho access token refreshed"
                );
                self.persist(&credentials).await;
                self.finish(Outcome::Acquired(credentials.clone()));
                Ok(credentials)
            }
            Err(err) => {
                self.record_refresh_failure(&err);
                self.finish(outcome_of(&err));
                Err(err)
            }
        }
    }

    /// Writes a successful grant into the state and re-arms the timer.
    fn install(&self, grant: TokenGrant) -> Credentials {
        let expires_at = now_millis().saturating_add(
            i64::try_from(grant.expires_in_secs)
                .unwrap_or(i64::MAX / 1000)
                .saturating_mul(1000),
        );

        let credentials = {
            let mut state = self.inner.state.write();
            let refresh_token = grant
                .refresh_token
                .or_else(|| state.credentials.refresh_token.take());
            state.credentials = Credentials {
                access_token: Some(grant.access_token),
                refresh_token,
                expires_at,
            };
            state.rejected = None;
            state.credentials.clone()
        };

        self.schedule_refresh(grant.expires_in_secs);
        credentials
    }

    fn schedule_refresh(&self, expires_in_secs: u64) {
        let delay = refresh_delay(expires_in_secs, &self.inner.policy);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        self.inner.timer.arm(delay, async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = TokenManager { inner };
            if let Err(err) = manager.refresh_access_token().await {
                tracing::warn!(
                    error = %err,
                    "scheduled token refresh failed; next API call will retry"
                );
            }
        });

        tracing::debug!(delay_secs = delay.as_secs(), "token refresh scheduled");
    }

    /// An upstream rejection of the refresh token breaks the state (access
    /// token dropped, refresh token kept for diagnostics). Transport failures
    /// leave the state alone so the next caller retries.
    fn record_refresh_failure(&self, err: &AuthError) {
        let mut state = self.inner.state.write();
        if err.oauth_error_code().is_some() {
            state.credentials.access_token = None;
            state.credentials.expires_at = 0;
            state.rejected = Some(err.to_string());
            tracing::error!(
                error = %err,
                refresh_token = %state
                    .credentials
                    .refresh_token
                    .as_deref()
                    .map(mask_token)
                    .unwrap_or_default(),
                "Zoho rejected the refresh token; re-authorization required"
            );
        } else {
            tracing::warn!(error = %err, "token refresh failed");
        }
    }

    async fn persist(&self, credentials: &Credentials) {
        let (Some(store), Some(token)) = (&self.inner.store, &credentials.refresh_token) else {
            return;
        };
        if let Err(err) = store.save(token).await {
            tracing::warn!(error = %err, "failed to persist refresh token");
        }
    }

    fn finish(&self, outcome: Outcome) {
        *self.inner.last_outcome.write() = Some(outcome);
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }
}

fn outcome_of(err: &AuthError) -> Outcome {
    match err {
        AuthError::UpstreamAuth { message, code } => Outcome::Failed {
            message: message.clone(),
            code: code.clone(),
        },
        other => Outcome::Failed {
            message: other.to_string(),
            code: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TokenManager {
        let config = ZohoOAuthConfig {
            client_id: "1000.CLIENT".into(),
            client_secret: "secret".into(),
            redirect_uri: "https://shop.example.com/auth/zoho/callback".into(),
            accounts_url: Some("http://127.0.0.1:9".into()),
            ..Default::default()
        };
        TokenManager::new(config, RefreshPolicy::default()).unwrap()
    }

    #[test]
    fn test_authorization_url() {
        let url = manager().authorization_url();
        assert_eq!(url.path(), "/oauth/v2/auth");

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "1000.CLIENT");
        assert_eq!(pairs["scope"], "ZohoBooks.fullaccess.all");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["prompt"], "consent");
        assert_eq!(
            pairs["redirect_uri"],
            "https://shop.example.com/auth/zoho/callback"
        );
    }

    #[test]
    fn test_authorization_url_is_deterministic() {
        let m = manager();
        assert_eq!(m.authorization_url(), m.authorization_url());
    }

    #[test]
    fn test_initial_state() {
        let m = manager();
        assert!(!m.is_authenticated());
        assert_eq!(m.status(), TokenStatus::Unauthenticated);
        assert_eq!(m.credentials(), Credentials::default());
        assert!(!m.refresh_scheduled());
    }

    #[tokio::test]
    async fn test_valid_token_before_auth_fails() {
        let err = manager().valid_access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_fails() {
        let err = manager().refresh_access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NotAuthenticated));
    }

    #[test]
    fn test_set_refresh_token_restores() {
        let m = manager();
        m.set_refresh_token("R-persisted");
        assert!(!m.is_authenticated());
        assert_eq!(m.status(), TokenStatus::Restored);
        assert_eq!(m.credentials().refresh_token.as_deref(), Some("R-persisted"));
        assert_eq!(m.credentials().expires_at, 0);
    }

    #[tokio::test]
    async fn test_empty_code_rejected_without_request() {
        let err = manager().exchange_authorization_code("  ").await.unwrap_err();
        assert!(matches!(err, AuthError::UpstreamAuth { .. }));
    }
}
