//! Cache-aside store for Zoho responses.
//!
//! ## Architecture
//!
//! ```text
//! GET request → CacheStore → Redis or in-memory map → (miss) Zoho Books API
//! ```
//!
//! ## Graceful Degradation
//!
//! The cache is best-effort. When Redis is unreachable every read is a miss
//! and every write is dropped; callers never see a cache error.

pub mod backend;

pub use backend::{CachedEntry, MemoryBackend, RedisBackend};

use backend::CacheError;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::RedisConfig;

/// Which backend is serving requests right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Process-local map.
    Memory,
    /// Redis, connected.
    Redis,
    /// Redis configured but unreachable; every operation is a no-op.
    Disabled,
}

/// Cache statistics for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub mode: CacheMode,
    pub connected: bool,
    /// Entry count (in-memory mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<MemoryBackend>),
    Redis(Arc<RedisBackend>),
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Typed JSON cache with TTLs. Cheap to clone.
#[derive(Clone)]
pub struct CacheStore {
    backend: Backend,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("mode", &self.mode())
            .finish()
    }
}

impl CacheStore {
    /// In-memory store.
    pub fn memory() -> Self {
        Self::with_backend(Backend::Memory(Arc::new(MemoryBackend::new())))
    }

    /// Redis-backed store. Does not connect until [`init`](Self::init) or the
    /// first operation.
    pub fn redis(config: RedisConfig) -> Self {
        Self::with_backend(Backend::Redis(Arc::new(RedisBackend::new(config))))
    }

    /// Redis when `redis.enabled`, in-memory otherwise.
    pub fn from_config(config: &RedisConfig) -> Self {
        if config.enabled {
            Self::redis(config.clone())
        } else {
            tracing::info!("Redis disabled, using in-memory cache");
            Self::memory()
        }
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Connects eagerly. Always succeeds; an unreachable Redis leaves the
    /// store in [`CacheMode::Disabled`].
    pub async fn init(&self) -> CacheMode {
        if let Backend::Redis(redis) = &self.backend {
            let _ = redis.connect().await;
        }
        self.mode()
    }

    /// Returns the cached value for `key`, or `None` on miss, decode failure
    /// or when the backend is unavailable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match &self.backend {
            Backend::Memory(map) => map.get(key).map(|json| json.to_string()),
            Backend::Redis(redis) => match redis.get(key).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cache GET failed");
                    None
                }
            },
        };

        let value = raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %CacheError::from(e), "discarding cached value");
                None
            }
        });

        if value.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "cache hit");
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "cache miss");
        }
        value
    }

    /// Stores `value` under `key` for `ttl`. Fire-and-forget: the Redis
    /// write runs on a detached task that logs its own failure.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key = %key, error = %CacheError::from(e), "cache SET skipped");
                return;
            }
        };

        match &self.backend {
            Backend::Memory(map) => map.set(key, json, ttl),
            Backend::Redis(redis) => {
                let redis = Arc::clone(redis);
                let key = key.to_string();
                tokio::spawn(async move {
                    match redis.set(&key, json, ttl).await {
                        Ok(()) => {
                            tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set")
                        }
                        Err(e) => tracing::warn!(key = %key, error = %e, "cache SET failed"),
                    }
                });
            }
        }
    }

    /// Removes `key`. Best-effort, like [`set`](Self::set).
    pub fn del(&self, key: &str) {
        match &self.backend {
            Backend::Memory(map) => map.del(key),
            Backend::Redis(redis) => {
                let redis = Arc::clone(redis);
                let key = key.to_string();
                tokio::spawn(async move {
                    if let Err(e) = redis.del(&key).await {
                        tracing::warn!(key = %key, error = %e, "cache DEL failed");
                    }
                });
            }
        }
    }

    /// True when operations reach a backend.
    pub fn is_connected(&self) -> bool {
        match &self.backend {
            Backend::Memory(_) => true,
            Backend::Redis(redis) => redis.is_connected(),
        }
    }

    pub fn mode(&self) -> CacheMode {
        match &self.backend {
            Backend::Memory(_) => CacheMode::Memory,
            Backend::Redis(redis) if redis.is_connected() => CacheMode::Redis,
            Backend::Redis(_) => CacheMode::Disabled,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            mode: self.mode(),
            connected: self.is_connected(),
            entries: match &self.backend {
                Backend::Memory(map) => Some(map.len()),
                Backend::Redis(_) => None,
            },
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }
}
