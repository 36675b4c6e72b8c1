//! Authentication value types.

use std::time::Duration;

use serde::Serialize;

use super::errors::AuthError;
use crate::db::Principal;
use crate::jwt::Claims;

/// The caller of the current request, materialized from a validated access
/// token and the identity's current roles and permissions.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub enabled: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    /// The raw access token presented with the request
    pub token: String,
    pub claims: Claims,
}

impl AuthenticatedPrincipal {
    pub(super) fn new(principal: Principal, token: String, claims: Claims) -> Self {
        Self {
            id: principal.id,
            username: principal.username,
            email: principal.email,
            enabled: principal.enabled,
            roles: principal.roles,
            permissions: principal.permissions,
            token,
            claims,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn require_permission(&self, permission: &str) -> Result<(), AuthError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

/// Public user summary returned with a token pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl From<&Principal> for UserInfo {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id,
            username: principal.username.clone(),
            roles: principal.roles.clone(),
            permissions: principal.permissions.clone(),
        }
    }
}

/// Response of login and refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in milliseconds
    pub expires_in: u64,
    pub user_info: UserInfo,
}

impl LoginResponse {
    pub fn new(
        access_token: String,
        refresh_token: String,
        access_ttl: Duration,
        user_info: UserInfo,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: u64::try_from(access_ttl.as_millis()).unwrap_or(u64::MAX),
            user_info,
        }
    }
}

/// The current user's profile.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub enabled: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl From<&AuthenticatedPrincipal> for Profile {
    fn from(principal: &AuthenticatedPrincipal) -> Self {
        Self {
            id: principal.id,
            username: principal.username.clone(),
            email: principal.email.clone(),
            enabled: principal.enabled,
            roles: principal.roles.clone(),
            permissions: principal.permissions.clone(),
        }
    }
}

/// Input of registration, already deserialized.
#[derive(Debug, Clone)]
pub struct Registration<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub confirm_password: &'a str,
    pub email: &'a str,
}

/// Input of a password change, already deserialized.
#[derive(Debug, Clone)]
pub struct PasswordChange<'a> {
    pub old_password: &'a str,
    pub new_password: &'a str,
    pub confirm_new_password: &'a str,
}
