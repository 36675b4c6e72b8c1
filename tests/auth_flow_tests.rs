//! Tests for the login, refresh and logout protocols over HTTP.
//!
//! Tests cover:
//! - Login response shape and token claims
//! - Credential failures that do not reveal whether a user exists
//! - Refresh without rotation, including after access token expiry
//! - Token kind enforcement on both the refresh endpoint and the gate
//! - Single active session per username
//! - Logout revoking both tokens

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{JWT_SECRET, TestApp, assert_code, test_app};
use gatehouse::clock::ManualClock;
use gatehouse::jwt::{TokenCodec, TokenKind};
use serde_json::json;
use std::sync::Arc;

async fn app_with_user(username: &str, password: &str) -> TestApp {
    let app = test_app().await;
    let (status, body) = app.register(username, password).await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
    app
}

#[tokio::test]
async fn test_login_returns_token_pair() {
    let app = app_with_user("carol", "Secret123").await;

    let (status, body) = app.login("carol", "Secret123").await;
    assert_eq!(status, StatusCode::OK);
    assert_code(&body, 200);
    assert_eq!(body["timestamp"].as_i64(), Some(common::START_MS));

    let data = &body["data"];
    assert_eq!(data["tokenType"], "Bearer");
    assert_eq!(data["expiresIn"], 3_600_000);
    assert_eq!(data["userInfo"]["username"], "carol");
    assert_eq!(data["userInfo"]["roles"], json!(["USER"]));
    assert_eq!(
        data["userInfo"]["permissions"],
        json!(["user:read", "user:write"])
    );

    let codec = TokenCodec::new(JWT_SECRET, Arc::new(ManualClock::new(common::START_MS)));
    let access = codec
        .decode(data["accessToken"].as_str().unwrap())
        .unwrap();
    assert_eq!(access.sub, "carol");
    assert_eq!(access.kind, TokenKind::Access);
    assert_eq!(access.uid, data["userInfo"]["id"].as_i64().unwrap());

    let refresh = codec
        .decode(data["refreshToken"].as_str().unwrap())
        .unwrap();
    assert_eq!(refresh.kind, TokenKind::Refresh);
    assert_eq!(refresh.exp - refresh.iat, 7 * 24 * 60 * 60);
}

#[tokio::test]
async fn test_login_failures_look_alike() {
    let app = app_with_user("carol", "Secret123").await;

    let (status, wrong_password) = app.login("carol", "Wrong1234").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&wrong_password, 40101);

    let (status, unknown_user) = app.login("nobody", "Secret123").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&unknown_user, 40101);
    assert_eq!(wrong_password["message"], unknown_user["message"]);
}

#[tokio::test]
async fn test_login_requires_both_fields() {
    let app = test_app().await;

    let (status, body) = app.login("", "Secret123").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_code(&body, 42201);

    let (status, body) = app
        .post_json("/api/auth/login", json!({ "username": "carol" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_code(&body, 42201);
}

#[tokio::test]
async fn test_disabled_account_reported_after_password_check() {
    let app = app_with_user("dave", "Secret123").await;
    let user = app.db.users().find_by_username("dave").await.unwrap().unwrap();
    app.db.users().set_enabled(user.id, false).await.unwrap();

    let (status, body) = app.login("dave", "Wrong1234").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40101);

    let (status, body) = app.login("dave", "Secret123").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_code(&body, 40301);
}

#[tokio::test]
async fn test_refresh_after_access_expiry() {
    let app = app_with_user("erin", "Secret123").await;
    let (access, refresh) = app.login_tokens("erin", "Secret123").await;

    let (status, _) = app.get_with_token("/api/user/profile", &access).await;
    assert_eq!(status, StatusCode::OK);

    app.advance(Duration::from_secs(60 * 60));
    let (status, body) = app.get_with_token("/api/user/profile", &access).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40102);

    let (status, body) = app.refresh(&refresh).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["refreshToken"], refresh.as_str());
    let new_access = body["data"]["accessToken"].as_str().unwrap();
    assert_ne!(new_access, access);

    let (status, body) = app.get_with_token("/api/user/profile", new_access).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "erin");
}

#[tokio::test]
async fn test_expired_refresh_token() {
    let app = app_with_user("erin", "Secret123").await;
    let (_, refresh) = app.login_tokens("erin", "Secret123").await;

    app.advance(Duration::from_secs(7 * 24 * 60 * 60));
    let (status, body) = app.refresh(&refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40103);
}

#[tokio::test]
async fn test_malformed_refresh_token() {
    let app = test_app().await;
    let (status, body) = app.refresh("definitely.not.a-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40102);
}

#[tokio::test]
async fn test_token_kinds_are_not_interchangeable() {
    let app = app_with_user("frank", "Secret123").await;
    let (access, refresh) = app.login_tokens("frank", "Secret123").await;

    let (status, body) = app.refresh(&access).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40104);

    // The gate rejects a refresh token with the uniform response
    let (status, body) = app.get_with_token("/api/user/profile", &refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40102);
}

#[tokio::test]
async fn test_new_login_supersedes_previous_session() {
    let app = app_with_user("grace", "Secret123").await;
    let (first_access, first_refresh) = app.login_tokens("grace", "Secret123").await;
    let (_, second_refresh) = app.login_tokens("grace", "Secret123").await;
    assert_ne!(first_refresh, second_refresh);

    let (status, body) = app.refresh(&first_refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40106);

    let (status, _) = app.refresh(&second_refresh).await;
    assert_eq!(status, StatusCode::OK);

    // Access tokens of the earlier session stay valid until they expire
    let (status, _) = app.get_with_token("/api/user/profile", &first_access).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_revokes_tokens_and_session() {
    let app = app_with_user("bob", "Secret123").await;
    let (access, refresh) = app.login_tokens("bob", "Secret123").await;

    let (status, body) = app.logout(&access, &refresh).await;
    assert_eq!(status, StatusCode::OK);
    assert_code(&body, 200);

    let (status, body) = app.get_with_token("/api/user/profile", &access).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40102);

    let (status, body) = app.refresh(&refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40106);

    // A fresh login works normally
    let (new_access, _) = app.login_tokens("bob", "Secret123").await;
    let (status, _) = app.get_with_token("/api/user/profile", &new_access).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_with_access_token_only_ends_session() {
    let app = app_with_user("bob", "Secret123").await;
    let (access, refresh) = app.login_tokens("bob", "Secret123").await;

    let (status, _) = app
        .send(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .header("Authorization", format!("Bearer {}", access))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.refresh(&refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_code(&body, 40106);
}

#[tokio::test]
async fn test_logout_without_tokens_succeeds() {
    let app = test_app().await;
    let (status, body) = app.post_json("/api/auth/logout", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_code(&body, 200);

    let (status, _) = app.logout("garbage", "more-garbage").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_of_expired_tokens_succeeds() {
    let app = app_with_user("bob", "Secret123").await;
    let (access, refresh) = app.login_tokens("bob", "Secret123").await;

    app.advance(Duration::from_secs(8 * 24 * 60 * 60));
    let (status, _) = app.logout(&access, &refresh).await;
    assert_eq!(status, StatusCode::OK);
}
