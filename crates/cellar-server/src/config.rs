use cellar_auth::{RefreshPolicy, TOKEN_KEY_ENV, ZohoOAuthConfig};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Zoho OAuth client and Books organization
    #[serde(default)]
    pub zoho: ZohoOAuthConfig,
    /// Proactive refresh policy
    #[serde(default)]
    pub token: RefreshPolicy,
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Per-endpoint cache TTLs
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Refresh-token persistence
    #[serde(default)]
    pub token_store: TokenStoreConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        if let Some(origin) = self.server.allowed_origin.as_deref()
            && origin != "*"
            && url::Url::parse(origin).is_err()
        {
            return Err(format!(
                "server.allowed_origin must be an origin URL or \"*\", got {origin:?}"
            ));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Cache validations
        if self.cache.products_ttl_secs == 0
            || self.cache.product_ttl_secs == 0
            || self.cache.organization_ttl_secs == 0
        {
            return Err("cache TTLs must be > 0".into());
        }
        if self.redis.enabled {
            if self.redis.url.trim().is_empty() {
                return Err("redis.enabled=true requires redis.url".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
            if self.redis.timeout_ms == 0 {
                return Err("redis.timeout_ms must be > 0".into());
            }
        }
        // Token validations
        if self.token.minimum_refresh_delay.is_zero() {
            return Err("token.minimum_refresh_delay must be > 0".into());
        }
        if self.token_store.path.is_some() && std::env::var_os(TOKEN_KEY_ENV).is_none() {
            return Err(format!(
                "token_store.path is set but {TOKEN_KEY_ENV} is missing; \
                 generate one with `cellar-server --generate-token-key`"
            ));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Browser origin allowed by CORS. Any origin when unset.
    #[serde(default)]
    pub allowed_origin: Option<String>,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3001
}
fn default_body_limit() -> usize {
    256 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origin: None,
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Use Redis as the cache backend. When false an in-memory cache is used.
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connect and command timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Minimum time between a connection failure and the next lazy reconnect
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

fn default_reconnect_backoff_ms() -> u64 {
    30_000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Cache TTLs for the proxied Zoho resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Item list TTL in seconds
    #[serde(default = "default_products_ttl_secs")]
    pub products_ttl_secs: u64,

    /// Single item TTL in seconds
    #[serde(default = "default_products_ttl_secs")]
    pub product_ttl_secs: u64,

    /// Organization profile TTL in seconds
    #[serde(default = "default_organization_ttl_secs")]
    pub organization_ttl_secs: u64,
}

fn default_products_ttl_secs() -> u64 {
    300
}

fn default_organization_ttl_secs() -> u64 {
    3600 // 1 hour
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            products_ttl_secs: default_products_ttl_secs(),
            product_ttl_secs: default_products_ttl_secs(),
            organization_ttl_secs: default_organization_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenStoreConfig {
    /// Encrypted refresh-token file. Tokens live in memory only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// Default configuration file, relative to the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "cellar.toml";

    /// Flat deployment variables and the keys they override.
    const FLAT_OVERRIDES: &[(&str, &str)] = &[
        ("ZOHO_CLIENT_ID", "zoho.client_id"),
        ("ZOHO_CLIENT_SECRET", "zoho.client_secret"),
        ("ZOHO_REDIRECT_URI", "zoho.redirect_uri"),
        ("ZOHO_ORGANIZATION_ID", "zoho.organization_id"),
        ("ZOHO_DOMAIN", "zoho.region"),
        ("ALLOWED_ORIGIN", "server.allowed_origin"),
        ("PORT", "server.port"),
        ("REDIS_URL", "redis.url"),
    ];

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        load_config_with_env(path, std::env::vars().collect())
    }

    /// Loads configuration with an explicit environment instead of the
    /// process one.
    ///
    /// Precedence, lowest first: file, `CELLAR__SECTION__KEY` variables, flat
    /// deployment variables (`ZOHO_CLIENT_ID`, `REDIS_URL`, `PORT`, ...).
    pub fn load_config_with_env(
        path: Option<&str>,
        env: HashMap<String, String>,
    ) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., CELLAR__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("CELLAR")
                .try_parsing(true)
                .separator("__")
                .source(Some(env.clone())),
        );
        builder = apply_flat_overrides(builder, &env)?;

        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }

    fn apply_flat_overrides(
        mut builder: ConfigBuilder<DefaultState>,
        env: &HashMap<String, String>,
    ) -> Result<ConfigBuilder<DefaultState>, String> {
        let lookup = |name: &str| {
            env.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        for (var, key) in FLAT_OVERRIDES {
            builder = builder
                .set_override_option(*key, lookup(var))
                .map_err(|e| format!("invalid {var}: {e}"))?;
        }
        // A Redis URL in the environment means Redis is wanted.
        if lookup("REDIS_URL").is_some() {
            builder = builder
                .set_override("redis.enabled", true)
                .map_err(|e| format!("invalid REDIS_URL: {e}"))?;
        }
        Ok(builder)
    }
}
