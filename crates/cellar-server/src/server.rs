use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method, header::CONTENT_TYPE},
    middleware,
    routing::get,
};
use cellar_auth::{EncryptedFileStore, TokenManager, TokenStore, mask_token};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    cache::CacheStore,
    config::AppConfig,
    handlers,
    middleware::{self as app_middleware, REQUEST_ID_HEADER},
    proxy::CACHE_STATUS_HEADER,
    zoho::BooksClient,
};

/// Shared application state, constructed once per process.
#[derive(Clone)]
pub struct AppState {
    pub tokens: TokenManager,
    pub cache: CacheStore,
    pub books: BooksClient,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

impl AppState {
    /// Builds the token manager, cache and Zoho client from configuration.
    ///
    /// A persisted refresh token is restored and warmed up in the background
    /// so the first API call after a restart does not pay for the refresh.
    pub async fn from_config(cfg: AppConfig) -> anyhow::Result<Self> {
        let mut tokens = TokenManager::new(cfg.zoho.clone(), cfg.token)
            .context("failed to create token manager")?;

        let mut restored = None;
        match cfg.token_store.path.as_deref() {
            Some(path) => match EncryptedFileStore::from_env(path)
                .context("failed to open token store")?
            {
                Some(store) => {
                    let store = Arc::new(store);
                    match store.load().await {
                        Ok(Some(token)) => {
                            tracing::info!(
                                path = %path.display(),
                                refresh_token = %mask_token(&token),
                                "restored persisted refresh token"
                            );
                            restored = Some(token);
                        }
                        Ok(None) => tracing::info!(
                            path = %path.display(),
                            "no persisted refresh token; authorize at /auth/zoho"
                        ),
                        Err(e) => tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to load persisted refresh token"
                        ),
                    }
                    tokens = tokens.with_store(store);
                }
                None => tracing::warn!(
                    path = %path.display(),
                    "token store configured without an encryption key; persistence disabled"
                ),
            },
            None => tracing::info!(
                "refresh-token persistence disabled; a restart requires re-authorization at /auth/zoho"
            ),
        }

        if let Some(token) = restored {
            tokens.set_refresh_token(token);
            let warm = tokens.clone();
            tokio::spawn(async move {
                match warm.refresh_access_token().await {
                    Ok(_) => tracing::info!("Zoho session resumed from persisted refresh token"),
                    Err(e) => tracing::warn!(
                        error = %e,
                        "persisted refresh token unusable; authorize at /auth/zoho"
                    ),
                }
            });
        }

        let cache = CacheStore::from_config(&cfg.redis);
        let mode = cache.init().await;
        tracing::info!(mode = ?mode, "cache initialized");

        let books = BooksClient::new(&cfg.zoho).context("failed to create Zoho Books client")?;

        Ok(Self {
            tokens,
            cache,
            books,
            config: Arc::new(cfg),
            started_at: Instant::now(),
        })
    }
}

pub struct CellarServer {
    addr: SocketAddr,
    app: Router,
    state: AppState,
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    let cors = cors_layer(state.config.server.allowed_origin.as_deref());

    let api = Router::new()
        .route("/products", get(handlers::list_products))
        .route(
            "/products/{id}",
            get(handlers::get_product).patch(handlers::update_product),
        )
        .route("/organization", get(handlers::get_organization))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::require_zoho_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/zoho", get(handlers::authorize))
        .route("/auth/zoho/callback", get(handlers::callback))
        .route("/auth/status", get(handlers::auth_status))
        .nest("/api", api)
        // Middleware stack (order: request id -> trace -> cors -> compression -> body limit)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(app_middleware::request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let req_id = req
                                .extensions()
                                .get::<HeaderValue>()
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("")
                                .to_string();
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri().path(),
                                http.status_code = Empty,
                                request_id = %req_id
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: std::time::Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = res.status().as_u16(),
                                    elapsed_ms = latency.as_millis() as u64,
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(cors)
                .layer(CompressionLayer::new())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// CORS restricted to `allowed_origin`, or open when unset or `*`.
fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::PATCH, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(REQUEST_ID_HEADER)])
        .expose_headers([
            HeaderName::from_static(CACHE_STATUS_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    match allowed_origin.map(str::trim).filter(|o| !o.is_empty() && *o != "*") {
        Some(origin) => match HeaderValue::from_str(origin.trim_end_matches('/')) {
            Ok(value) => base.allow_origin(value),
            Err(e) => {
                tracing::warn!(origin, error = %e, "invalid allowed_origin; allowing any origin");
                base.allow_origin(Any)
            }
        },
        None => base.allow_origin(Any),
    }
}

#[derive(Default)]
pub struct ServerBuilder {
    addr: Option<SocketAddr>,
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<CellarServer> {
        let addr = self.addr.unwrap_or_else(|| self.config.addr());
        let state = AppState::from_config(self.config).await?;
        let app = build_app(state.clone());

        Ok(CellarServer { addr, app, state })
    }
}

impl CellarServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.state.tokens.shutdown();
        tracing::info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
