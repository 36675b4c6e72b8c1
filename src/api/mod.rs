mod auth;
mod error;
mod users;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::auth::AuthService;
use crate::impl_has_auth_backend;
use crate::rate_limit::RateLimitConfig;

pub use error::{ApiJson, ApiResponse};

/// State shared by every API handler.
#[derive(Clone)]
pub struct ApiState {
    pub auth: Arc<AuthService>,
}

impl_has_auth_backend!(ApiState);

/// Create the API router.
pub fn create_api_router(auth: Arc<AuthService>, rate_limit: Arc<RateLimitConfig>) -> Router {
    let clock = auth.clock().clone();
    let state = ApiState { auth };

    Router::new()
        .nest("/auth", auth::router(state.clone(), rate_limit))
        .nest("/user", users::router(state))
        .layer(middleware::from_fn_with_state(clock, error::with_envelope_clock))
}
