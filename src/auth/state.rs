//! Authentication settings and the state trait handlers depend on.

use std::time::Duration;

use axum::http::{HeaderName, header};

use super::service::AuthService;

/// Immutable authentication settings, built once at startup.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Consecutive failures that lock an account
    pub max_login_failures: u32,
    pub lock_duration: Duration,
    /// Header carrying the bearer token
    pub token_header: HeaderName,
    /// Scheme word in front of the token, without the trailing space
    pub token_prefix: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(60 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            max_login_failures: 5,
            lock_duration: Duration::from_secs(30 * 60),
            token_header: header::AUTHORIZATION,
            token_prefix: "Bearer".to_string(),
        }
    }
}

/// Trait for state types that provide the authentication service.
pub trait HasAuthBackend {
    fn auth(&self) -> &AuthService;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard field.
///
/// The struct must have an `auth: Arc<AuthService>` field.
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct MyState {
///     pub auth: Arc<AuthService>,
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn auth(&self) -> &$crate::auth::AuthService {
                &self.auth
            }
        }
    };
}
