pub mod api;
pub mod auth;
pub mod cache;
pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod db;
pub mod jwt;
pub mod password;
pub mod rate_limit;

use api::create_api_router;
use auth::{AuthService, AuthSettings};
use axum::Router;
use cache::{ExpiringCache, MemoryCache, SessionCache};
use cli::CacheBackend;
use clock::Clock;
use db::Database;
use password::PasswordHasher;
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// Token lifetimes, lockout policy and token header format
    pub settings: AuthSettings,
    /// Where blacklist, sessions and failure counters live
    pub cache_backend: CacheBackend,
    pub clock: Arc<dyn Clock>,
    pub password_hasher: PasswordHasher,
    /// Take the client IP from X-Forwarded-For (requires running behind a proxy)
    pub trust_forwarded_for: bool,
    pub login_rate_per_minute: u32,
    pub register_rate_per_minute: u32,
}

/// Long-lived services shared by the router and background tasks.
pub struct AppServices {
    pub auth: Arc<AuthService>,
    pub cache: Arc<dyn ExpiringCache>,
    pub rate_limit: Arc<RateLimitConfig>,
}

/// Build the services described by `config`.
pub fn build_services(config: &ServerConfig) -> AppServices {
    let cache: Arc<dyn ExpiringCache> = match config.cache_backend {
        CacheBackend::Sqlite => Arc::new(config.db.cache(config.clock.clone())),
        CacheBackend::Memory => Arc::new(MemoryCache::new(config.clock.clone())),
    };

    let auth = Arc::new(AuthService::new(
        &config.db,
        SessionCache::new(cache.clone()),
        &config.jwt_secret,
        config.password_hasher.clone(),
        config.settings.clone(),
        config.clock.clone(),
    ));

    let rate_limit = Arc::new(RateLimitConfig::new(
        config.login_rate_per_minute,
        config.register_rate_per_minute,
        config.trust_forwarded_for,
    ));

    AppServices {
        auth,
        cache,
        rate_limit,
    }
}

/// Create the application router over existing services.
pub fn create_router(services: &AppServices) -> Router {
    Router::new().nest(
        "/api",
        create_api_router(services.auth.clone(), services.rate_limit.clone()),
    )
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    create_router(&build_services(config))
}

/// Run cleanup tasks and spawn background scheduler.
pub async fn init_cleanup(services: &AppServices) {
    cleanup::run_cleanup(services.cache.as_ref(), &services.rate_limit).await;
    cleanup::spawn_cleanup_scheduler(services.cache.clone(), services.rate_limit.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let services = build_services(&config);
    init_cleanup(&services).await;

    let app = create_router(&services);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
