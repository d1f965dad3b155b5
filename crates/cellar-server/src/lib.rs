pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod proxy;
pub mod server;
pub mod zoho;

pub use cache::{CacheMode, CacheStats, CacheStore};
pub use config::{AppConfig, CacheConfig, LoggingConfig, RedisConfig, ServerConfig, TokenStoreConfig};
pub use error::ApiError;
pub use observability::init_tracing;
pub use proxy::{CacheStatus, Cached, cached_read};
pub use server::{AppState, CellarServer, ServerBuilder, build_app};
pub use zoho::{BooksClient, ZohoApiError};
