#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use gatehouse::{
    ServerConfig,
    auth::AuthSettings,
    cli::CacheBackend,
    clock::ManualClock,
    create_app,
    db::{ADMIN_ROLE, Database, NewUser},
    password::PasswordHasher,
};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const JWT_SECRET: &[u8] = b"integration-test-secret-of-at-least-32-bytes";

/// Start of the simulated timeline (2023-11-14T22:13:20Z).
pub const START_MS: i64 = 1_700_000_000_000;

pub const CLIENT_IP: &str = "203.0.113.10";

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub clock: Arc<ManualClock>,
}

pub struct TestOptions {
    pub settings: AuthSettings,
    pub cache_backend: CacheBackend,
    pub login_rate_per_minute: u32,
    pub register_rate_per_minute: u32,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            settings: AuthSettings::default(),
            cache_backend: CacheBackend::Sqlite,
            login_rate_per_minute: 10_000,
            register_rate_per_minute: 10_000,
        }
    }
}

/// App over an in-memory database with default settings.
pub async fn test_app() -> TestApp {
    test_app_with(TestOptions::default()).await
}

pub async fn test_app_with(options: TestOptions) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let clock = Arc::new(ManualClock::new(START_MS));

    let config = ServerConfig {
        db: db.clone(),
        jwt_secret: JWT_SECRET.to_vec(),
        settings: options.settings,
        cache_backend: options.cache_backend,
        clock: clock.clone(),
        password_hasher: PasswordHasher::with_cost(4),
        trust_forwarded_for: true,
        login_rate_per_minute: options.login_rate_per_minute,
        register_rate_per_minute: options.register_rate_per_minute,
    };

    TestApp {
        router: create_app(&config),
        db,
        clock,
    }
}

impl TestApp {
    /// Send a request and decode the JSON envelope.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .header("X-Forwarded-For", CLIENT_IP)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// GET with `Authorization: Bearer <token>`.
    pub async fn get_with_token(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn register(&self, username: &str, password: &str) -> (StatusCode, Value) {
        self.post_json(
            "/api/auth/register",
            json!({
                "username": username,
                "password": password,
                "confirmPassword": password,
                "email": format!("{}@example.com", username),
            }),
        )
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> (StatusCode, Value) {
        self.post_json(
            "/api/auth/login",
            json!({ "username": username, "password": password }),
        )
        .await
    }

    /// Log in and return (access_token, refresh_token). Panics on failure.
    pub async fn login_tokens(&self, username: &str, password: &str) -> (String, String) {
        let (status, body) = self.login(username, password).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        (
            body["data"]["accessToken"].as_str().unwrap().to_string(),
            body["data"]["refreshToken"].as_str().unwrap().to_string(),
        )
    }

    pub async fn refresh(&self, refresh_token: &str) -> (StatusCode, Value) {
        self.post_json(
            "/api/auth/refresh",
            json!({ "refreshToken": refresh_token }),
        )
        .await
    }

    pub async fn logout(&self, access_token: &str, refresh_token: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(format!("/api/auth/logout?refreshToken={}", refresh_token))
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Insert an admin directly, bypassing registration.
    pub async fn create_admin(&self, username: &str, password: &str) -> i64 {
        let digest = PasswordHasher::with_cost(4).hash(password).unwrap();
        let id = self
            .db
            .users()
            .create(&NewUser {
                username,
                email: None,
                password_hash: &digest,
            })
            .await
            .unwrap();
        self.db.users().assign_role(id, ADMIN_ROLE).await.unwrap();
        id
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

/// Assert the envelope carries the given error code.
#[track_caller]
pub fn assert_code(body: &Value, code: u64) {
    assert_eq!(body["code"].as_u64(), Some(code), "unexpected body: {}", body);
}
