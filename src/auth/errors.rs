//! Authentication error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::api::ApiResponse;
use crate::jwt::TokenError;

/// Every failure the authentication core can report. Each variant has a
/// stable numeric code that clients can match on.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Account is disabled")]
    AccountDisabled,
    #[error("Account is locked, try again in {remaining_minutes} minutes")]
    AccountLocked {
        /// When the lock lapses (Unix milliseconds)
        unlock_at_ms: i64,
        remaining_minutes: i64,
    },
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Wrong token type")]
    WrongTokenKind,
    #[error("Token has been revoked")]
    TokenRevoked,
    #[error("Refresh token does not belong to the active session")]
    SessionMismatch,
    #[error("Logout failed")]
    LogoutFailed,
    #[error("Service temporarily unavailable")]
    StoreUnavailable,
    #[error("Internal server error")]
    Internal,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Too many requests, please try again later")]
    RateLimited,
}

impl AuthError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn code(&self) -> u32 {
        match self {
            AuthError::InvalidCredentials => 40101,
            AuthError::AccountDisabled => 40301,
            AuthError::AccountLocked { .. } => 42301,
            AuthError::InvalidToken => 40102,
            AuthError::TokenExpired => 40103,
            AuthError::WrongTokenKind => 40104,
            AuthError::TokenRevoked => 40105,
            AuthError::SessionMismatch => 40106,
            AuthError::LogoutFailed => 50001,
            AuthError::StoreUnavailable => 50301,
            AuthError::Internal => 50000,
            AuthError::Validation(_) => 42201,
            AuthError::Conflict(_) => 40901,
            AuthError::Forbidden => 40302,
            AuthError::NotAuthenticated => 40100,
            AuthError::RateLimited => 42901,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::WrongTokenKind
            | AuthError::TokenRevoked
            | AuthError::SessionMismatch
            | AuthError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AuthError::AccountDisabled | AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::AccountLocked { .. } => StatusCode::LOCKED,
            AuthError::LogoutFailed | AuthError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Whether this failure comes from the infrastructure rather than from
    /// the caller's credentials or input.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AuthError::StoreUnavailable | AuthError::LogoutFailed | AuthError::Internal
        )
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Malformed(_) => AuthError::InvalidToken,
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::WrongKind { .. } => AuthError::WrongTokenKind,
            TokenError::Encoding(e) => {
                error!(error = %e, "Failed to sign token");
                AuthError::Internal
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let data = match &self {
            AuthError::AccountLocked {
                unlock_at_ms,
                remaining_minutes,
            } => Some(json!({
                "unlockAt": unlock_at_ms,
                "remainingMinutes": remaining_minutes,
            })),
            _ => None,
        };
        let body = ApiResponse::failure(self.code(), self.to_string(), data);
        (self.status(), body).into_response()
    }
}

/// Extension trait for mapping storage faults on Results.
pub trait ResultExt<T> {
    /// Log the fault with `context` and report it as `StoreUnavailable`.
    fn store_err(self, context: &str) -> Result<T, AuthError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn store_err(self, context: &str) -> Result<T, AuthError> {
        self.map_err(|e| {
            error!(error = %e, "{}", context);
            AuthError::StoreUnavailable
        })
    }
}
