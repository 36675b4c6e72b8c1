//! Axum extractors for the principal attached by the request authenticator.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::errors::AuthError;
use super::types::AuthenticatedPrincipal;
use crate::db::ADMIN_ROLE;

/// A role requirement checked by [`Auth`].
pub trait RoleConstraint {
    fn allows(principal: &AuthenticatedPrincipal) -> bool;
}

/// Any authenticated principal.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    fn allows(_: &AuthenticatedPrincipal) -> bool {
        true
    }
}

/// Principals holding the `ADMIN` role.
pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    fn allows(principal: &AuthenticatedPrincipal) -> bool {
        principal.has_role(ADMIN_ROLE)
    }
}

/// Requires an authenticated principal satisfying `R`.
///
/// Fails with `NotAuthenticated` when the request carried no token and with
/// `Forbidden` when the principal lacks the role.
pub struct Auth<R: RoleConstraint = AnyRole>(pub AuthenticatedPrincipal, PhantomData<R>);

impl<R: RoleConstraint> Auth<R> {
    pub fn principal(&self) -> &AuthenticatedPrincipal {
        &self.0
    }
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: Send + Sync,
    R: RoleConstraint,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .extensions
            .get::<AuthenticatedPrincipal>()
            .cloned()
            .ok_or(AuthError::NotAuthenticated)?;

        if !R::allows(&principal) {
            tracing::warn!(username = %principal.username, "Insufficient role");
            return Err(AuthError::Forbidden);
        }
        Ok(Auth(principal, PhantomData))
    }
}
