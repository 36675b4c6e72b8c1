use axum::{
    Router,
    extract::State,
    middleware,
    routing::{get, put},
};
use serde::Deserialize;

use super::ApiState;
use super::error::{ApiJson, ApiResponse};
use crate::auth::{AdminOnly, Auth, AuthError, PasswordChange, Profile, request_authenticator};
use crate::db::UserSummary;

/// Permission needed to read one's own profile.
const USER_READ: &str = "user:read";

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/profile", get(profile))
        .route("/password", put(change_password))
        .route("/admin/users", get(list_users))
        .with_state(state.clone())
        .route_layer(middleware::from_fn_with_state(
            state,
            request_authenticator::<ApiState>,
        ))
}

async fn profile(auth: Auth) -> Result<ApiResponse<Profile>, AuthError> {
    let principal = auth.principal();
    principal.require_permission(USER_READ)?;
    Ok(ApiResponse::success(Profile::from(principal)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    old_password: String,
    new_password: String,
    confirm_new_password: String,
}

async fn change_password(
    State(state): State<ApiState>,
    auth: Auth,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> Result<ApiResponse<()>, AuthError> {
    state
        .auth
        .change_password(
            auth.principal(),
            &PasswordChange {
                old_password: &payload.old_password,
                new_password: &payload.new_password,
                confirm_new_password: &payload.confirm_new_password,
            },
        )
        .await?;
    Ok(ApiResponse::message(
        "Password changed, please log in again",
    ))
}

async fn list_users(
    State(state): State<ApiState>,
    _admin: Auth<AdminOnly>,
) -> Result<ApiResponse<Vec<UserSummary>>, AuthError> {
    let users = state.auth.list_users().await?;
    Ok(ApiResponse::success(users))
}
