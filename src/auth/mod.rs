//! Bearer token authentication with login lockout.
//!
//! Login issues an access token and a refresh token. The refresh token is
//! registered as the single active session for the username; refreshing
//! returns a new access token and keeps the refresh token. Logout blacklists
//! both tokens for the rest of their lifetime and ends the session.

mod authenticator;
mod errors;
mod extractors;
mod guard;
mod ip;
mod service;
mod state;
mod types;
mod validation;

pub use authenticator::{authenticate_request, bearer_token, extract_bearer, request_authenticator};
pub use errors::{AuthError, ResultExt};
pub use extractors::{AdminOnly, AnyRole, Auth, RoleConstraint};
pub use guard::{GuardState, LoginGuard};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use service::AuthService;
pub use state::{AuthSettings, HasAuthBackend};
pub use types::{
    AuthenticatedPrincipal, LoginResponse, PasswordChange, Profile, Registration, UserInfo,
};
pub use validation::{validate_email, validate_password, validate_username};
