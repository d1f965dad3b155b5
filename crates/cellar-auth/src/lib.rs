//! # cellar-auth
//!
//! OAuth token lifecycle for the Zoho Books middleware.
//!
//! ## Modules
//!
//! - [`config`] - OAuth client registration, Zoho regions, refresh policy
//! - [`token`] - [`TokenManager`] and the accounts-server client
//! - [`store`] - encrypted refresh-token persistence
//! - [`error`] - [`AuthError`]

pub mod config;
pub mod error;
pub mod store;
pub mod token;

pub use config::{DEFAULT_SCOPE, RefreshPolicy, ZohoOAuthConfig, ZohoRegion};
pub use error::AuthError;
pub use store::{EncryptedFileStore, TOKEN_KEY_ENV, TokenStore};
pub use token::{Credentials, TokenEndpoint, TokenGrant, TokenManager, TokenStatus, mask_token};

/// Type alias for token lifecycle results.
pub type AuthResult<T> = Result<T, AuthError>;
