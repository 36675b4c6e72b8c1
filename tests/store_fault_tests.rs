//! Tests for how cache outages surface over HTTP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{JWT_SECRET, START_MS, TestApp, assert_code};
use gatehouse::{
    AppServices,
    auth::{AuthService, AuthSettings},
    cache::{CacheError, ExpiringCache, SessionCache},
    clock::ManualClock,
    create_router,
    db::{DEFAULT_ROLE, Database},
    jwt::{TokenCodec, TokenKind},
    password::PasswordHasher,
    rate_limit::RateLimitConfig,
};
use serde_json::json;

/// A cache whose backend is unreachable.
struct UnreachableCache;

fn unreachable() -> CacheError {
    CacheError::Backend(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl ExpiringCache for UnreachableCache {
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(unreachable())
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(unreachable())
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Err(unreachable())
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, CacheError> {
        Err(unreachable())
    }

    async fn increment(&self, _key: &str, _ttl: Duration) -> Result<i64, CacheError> {
        Err(unreachable())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        Err(unreachable())
    }
}

async fn app_without_cache() -> (TestApp, i64) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let clock = Arc::new(ManualClock::new(START_MS));
    let cache: Arc<dyn ExpiringCache> = Arc::new(UnreachableCache);

    let auth = Arc::new(AuthService::new(
        &db,
        SessionCache::new(cache.clone()),
        JWT_SECRET,
        PasswordHasher::with_cost(4),
        AuthSettings::default(),
        clock.clone(),
    ));
    let user_id = auth
        .create_user("dana", None, "Secret123", DEFAULT_ROLE)
        .await
        .unwrap();

    let services = AppServices {
        auth,
        cache,
        rate_limit: Arc::new(RateLimitConfig::new(10_000, 10_000, true)),
    };
    let app = TestApp {
        router: create_router(&services),
        db,
        clock,
    };
    (app, user_id)
}

fn access_token(user_id: i64) -> String {
    TokenCodec::new(JWT_SECRET, Arc::new(ManualClock::new(START_MS)))
        .issue("dana", user_id, TokenKind::Access, Duration::from_secs(3600))
        .unwrap()
        .token
}

#[tokio::test]
async fn test_gate_reports_outage_instead_of_invalid_token() {
    let (app, user_id) = app_without_cache().await;

    let (status, body) = app
        .get_with_token("/api/user/profile", &access_token(user_id))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_code(&body, 50301);

    // A bad token is still rejected before the cache is consulted
    let (status, body) = app.get_with_token("/api/user/profile", "garbage").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40102);
}

#[tokio::test]
async fn test_login_reports_outage() {
    let (app, _) = app_without_cache().await;

    let (status, body) = app.login("dana", "Secret123").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_code(&body, 50301);

    // Failure counting needs the cache too
    let (status, body) = app.login("dana", "Wrong1234").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_code(&body, 50301);

    // Unknown users never reach the cache
    let (status, body) = app.login("nobody", "Secret123").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40101);
}

#[tokio::test]
async fn test_logout_reports_failure() {
    let (app, user_id) = app_without_cache().await;

    let (status, body) = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", access_token(user_id)),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_code(&body, 50001);

    let (status, body) = app
        .post_json("/api/auth/refresh", json!({ "refreshToken": "garbage" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40102);
}
