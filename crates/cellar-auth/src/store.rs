//! Refresh-token persistence.
//!
//! The refresh token is the only credential that survives a restart. When a
//! store is configured it is written encrypted with AES-256-GCM after every
//! acquisition and read back at startup.

use std::path::{Path, PathBuf};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Environment variable holding the 32-byte encryption key (hex or base64).
pub const TOKEN_KEY_ENV: &str = "CELLAR_TOKEN_KEY";

/// Nonce size for AES-256-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
pub const KEY_SIZE: usize = 32;

/// Where refresh tokens are kept between restarts.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns the persisted refresh token, if any.
    async fn load(&self) -> Result<Option<String>, AuthError>;

    /// Persists `refresh_token`, replacing any previous value.
    async fn save(&self, refresh_token: &str) -> Result<(), AuthError>;
}

/// On-disk envelope of an encrypted refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedToken {
    /// Base64-encoded ciphertext
    ciphertext: String,
    /// Base64-encoded nonce
    nonce: String,
    /// Unix timestamp of the write
    saved_at: i64,
}

impl SealedToken {
    fn seal(plaintext: &str, key: &[u8; KEY_SIZE]) -> Result<Self, AuthError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| AuthError::storage(format!("failed to create cipher: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AuthError::storage(format!("encryption failed: {e}")))?;

        Ok(Self {
            ciphertext: BASE64.encode(&ciphertext),
            nonce: BASE64.encode(nonce_bytes),
            saved_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        })
    }

    fn open(&self, key: &[u8; KEY_SIZE]) -> Result<String, AuthError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| AuthError::storage(format!("failed to create cipher: {e}")))?;

        let ciphertext = BASE64
            .decode(&self.ciphertext)
            .map_err(|e| AuthError::storage(format!("invalid ciphertext base64: {e}")))?;
        let nonce_bytes = BASE64
            .decode(&self.nonce)
            .map_err(|e| AuthError::storage(format!("invalid nonce base64: {e}")))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(AuthError::storage("invalid nonce size"));
        }

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| AuthError::storage("decryption failed (wrong key or corrupted file)"))?;

        String::from_utf8(plaintext)
            .map_err(|e| AuthError::storage(format!("invalid UTF-8 in decrypted token: {e}")))
    }
}

/// Stores the refresh token in a single encrypted JSON file.
pub struct EncryptedFileStore {
    path: PathBuf,
    key: [u8; KEY_SIZE],
}

impl EncryptedFileStore {
    pub fn new(path: impl Into<PathBuf>, key: [u8; KEY_SIZE]) -> Self {
        Self {
            path: path.into(),
            key,
        }
    }

    /// Builds a store keyed from [`TOKEN_KEY_ENV`]. Returns `Ok(None)` when the
    /// variable is unset.
    pub fn from_env(path: impl Into<PathBuf>) -> Result<Option<Self>, AuthError> {
        match std::env::var(TOKEN_KEY_ENV) {
            Ok(raw) => Ok(Some(Self::new(path, parse_key(&raw)?))),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(AuthError::configuration(format!(
                "failed to read {TOKEN_KEY_ENV}: {e}"
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenStore for EncryptedFileStore {
    async fn load(&self) -> Result<Option<String>, AuthError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::storage(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let sealed: SealedToken = serde_json::from_str(&raw).map_err(|e| {
            AuthError::storage(format!("malformed token file {}: {e}", self.path.display()))
        })?;
        sealed.open(&self.key).map(Some)
    }

    async fn save(&self, refresh_token: &str) -> Result<(), AuthError> {
        let sealed = SealedToken::seal(refresh_token, &self.key)?;
        let json = serde_json::to_vec_pretty(&sealed)
            .map_err(|e| AuthError::storage(format!("failed to encode token file: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AuthError::storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        // Readers only ever see a complete file.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| AuthError::storage(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            AuthError::storage(format!("failed to replace {}: {e}", self.path.display()))
        })?;

        tracing::debug!(path = %self.path.display(), "refresh token persisted");
        Ok(())
    }
}

/// Parses a key from a hex or base64 string.
pub fn parse_key(key_str: &str) -> Result<[u8; KEY_SIZE], AuthError> {
    let key_str = key_str.trim();

    if key_str.len() == KEY_SIZE * 2
        && let Ok(bytes) = hex::decode(key_str)
    {
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        return Ok(key);
    }

    let bytes = BASE64
        .decode(key_str)
        .map_err(|e| AuthError::configuration(format!("invalid base64 token key: {e}")))?;
    if bytes.len() != KEY_SIZE {
        return Err(AuthError::configuration(format!(
            "token key must be {} bytes, got {}",
            KEY_SIZE,
            bytes.len()
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Generates a random key, e.g. for `cellar-server --generate-token-key`.
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = generate_key();
        let sealed = SealedToken::seal("1000.refresh", &key).unwrap();
        assert_ne!(sealed.ciphertext, "1000.refresh");
        assert_eq!(sealed.open(&key).unwrap(), "1000.refresh");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SealedToken::seal("1000.refresh", &generate_key()).unwrap();
        assert!(sealed.open(&generate_key()).is_err());
    }

    #[test]
    fn test_parse_key_hex_and_base64() {
        let key = generate_key();
        assert_eq!(parse_key(&hex::encode(key)).unwrap(), key);
        assert_eq!(parse_key(&BASE64.encode(key)).unwrap(), key);
        assert!(parse_key("too-short").is_err());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path().join("nested/token.json"), generate_key());

        assert_eq!(store.load().await.unwrap(), None);

        store.save("R1").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("R1"));

        store.save("R2").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("R2"));

        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert!(!on_disk.contains("\"R2\""));
    }

    #[tokio::test]
    async fn test_file_store_rejects_other_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");

        EncryptedFileStore::new(&path, generate_key())
            .save("R1")
            .await
            .unwrap();

        let err = EncryptedFileStore::new(&path, generate_key())
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Storage { .. }));
    }
}
