use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use super::error::{ApiJson, ApiResponse};
use crate::auth::{AuthError, LoginResponse, Registration, bearer_token};
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_register};

pub fn router(state: ApiState, rate_limit: Arc<RateLimitConfig>) -> Router {
    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            rate_limit.clone(),
            rate_limit_login,
        ));

    let register_router = Router::new()
        .route("/register", post(register))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(rate_limit, rate_limit_register));

    let session_router = Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .with_state(state);

    Router::new()
        .merge(login_router)
        .merge(register_router)
        .merge(session_router)
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<ApiState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<ApiResponse<LoginResponse>, AuthError> {
    let response = state.auth.login(&payload.username, &payload.password).await?;
    Ok(ApiResponse::success_with("Login successful", response))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    username: String,
    password: String,
    confirm_password: String,
    email: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    id: i64,
    username: String,
}

async fn register(
    State(state): State<ApiState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let username = payload.username.trim();
    let id = state
        .auth
        .register(&Registration {
            username,
            password: &payload.password,
            confirm_password: &payload.confirm_password,
            email: payload.email.trim(),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::success_with(
            "Registration successful",
            RegisterResponse {
                id,
                username: username.to_string(),
            },
        ),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    State(state): State<ApiState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> Result<ApiResponse<LoginResponse>, AuthError> {
    let response = state.auth.refresh(&payload.refresh_token).await?;
    Ok(ApiResponse::success_with("Token refreshed", response))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutQuery {
    refresh_token: Option<String>,
}

async fn logout(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<LogoutQuery>,
) -> Result<ApiResponse<()>, AuthError> {
    // Unreadable headers are treated like absent ones
    let access_token = bearer_token(&headers, &state.auth).ok().flatten();

    state
        .auth
        .logout(access_token, query.refresh_token.as_deref())
        .await?;
    Ok(ApiResponse::message("Logout successful"))
}
