//! Token lifecycle error types.
//!
//! Every fallible operation on [`TokenManager`](crate::TokenManager) returns
//! one of these. The HTTP layer maps them onto status codes; nothing here
//! knows about HTTP.

/// Errors that can occur while acquiring, refreshing or persisting tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credentials have been acquired yet (or the refresh token is missing).
    /// The operator has to run the authorization-code flow.
    #[error("Not authenticated with Zoho; visit /auth/zoho to authorize")]
    NotAuthenticated,

    /// The accounts server rejected a code or refresh-token exchange, or the
    /// exchange could not be completed. Requires re-authorization.
    #[error("Zoho token exchange failed: {message}")]
    UpstreamAuth {
        /// Description of the upstream rejection or transport failure.
        message: String,
        /// OAuth error code reported by the accounts server, if any.
        code: Option<String>,
    },

    /// The OAuth client configuration is unusable.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The refresh-token store could not be read or written.
    #[error("Token store error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `UpstreamAuth` error without an OAuth error code.
    #[must_use]
    pub fn upstream_auth(message: impl Into<String>) -> Self {
        Self::UpstreamAuth {
            message: message.into(),
            code: None,
        }
    }

    /// Creates a new `UpstreamAuth` error carrying the accounts server's error code.
    #[must_use]
    pub fn upstream_auth_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::UpstreamAuth {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns `true` if recovering from this error needs a fresh
    /// authorization-code exchange.
    #[must_use]
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::UpstreamAuth { .. })
    }

    /// Returns the OAuth error code reported upstream, if any.
    #[must_use]
    pub fn oauth_error_code(&self) -> Option<&str> {
        match self {
            Self::UpstreamAuth { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
