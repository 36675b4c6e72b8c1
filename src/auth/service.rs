//! Login, refresh and logout protocols, plus the account operations built on them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::errors::{AuthError, ResultExt};
use super::guard::LoginGuard;
use super::state::AuthSettings;
use super::types::{
    AuthenticatedPrincipal, LoginResponse, PasswordChange, Registration, UserInfo,
};
use super::validation::{
    validate_confirmation, validate_email, validate_password, validate_username,
};
use crate::cache::SessionCache;
use crate::clock::Clock;
use crate::db::{DEFAULT_ROLE, Database, NewUser, Principal, UserStore, UserSummary};
use crate::jwt::{IssuedToken, TokenCodec, TokenKind};
use crate::password::PasswordHasher;

/// Orchestrates identity lookup, password verification, the login guard and
/// the token codec. Holds no per-request state.
pub struct AuthService {
    users: UserStore,
    codec: TokenCodec,
    cache: SessionCache,
    guard: LoginGuard,
    hasher: PasswordHasher,
    settings: AuthSettings,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    pub fn new(
        db: &Database,
        cache: SessionCache,
        jwt_secret: &[u8],
        hasher: PasswordHasher,
        settings: AuthSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = LoginGuard::new(
            db.users(),
            cache.clone(),
            clock.clone(),
            settings.max_login_failures,
            settings.lock_duration,
        );
        Self {
            users: db.users(),
            codec: TokenCodec::new(jwt_secret, clock.clone()),
            cache,
            guard,
            hasher,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn guard(&self) -> &LoginGuard {
        &self.guard
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn issue(&self, principal: &Principal, kind: TokenKind) -> Result<IssuedToken, AuthError> {
        let ttl = match kind {
            TokenKind::Access => self.settings.access_ttl,
            TokenKind::Refresh => self.settings.refresh_ttl,
        };
        Ok(self
            .codec
            .issue(&principal.username, principal.id, kind, ttl)?)
    }

    /// Time left before a token expiring at `expires_at_ms` lapses.
    fn remaining(&self, expires_at_ms: i64) -> Duration {
        let remaining = expires_at_ms.saturating_sub(self.clock.now_ms());
        Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
    }

    /// Authenticate with username and password and open a new session.
    ///
    /// Unknown usernames and wrong passwords both report `InvalidCredentials`.
    /// A disabled account is only reported once the password has matched.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::validation("Username and password are required"));
        }

        let Some(principal) = self.guard.check_before_auth(username).await? else {
            // Same bcrypt cost as a known user with a wrong password
            self.hasher.verify_dummy_blocking(password).await;
            warn!(username = %username, "Login failed: unknown user");
            return Err(AuthError::InvalidCredentials);
        };

        if !self
            .hasher
            .verify_blocking(password, &principal.password_hash)
            .await
        {
            self.guard.record_failure(&principal).await?;
            return Err(AuthError::InvalidCredentials);
        }

        if !principal.enabled {
            warn!(username = %username, "Login rejected: account disabled");
            return Err(AuthError::AccountDisabled);
        }

        self.guard.on_success(&principal).await?;

        let access = self.issue(&principal, TokenKind::Access)?;
        let refresh = self.issue(&principal, TokenKind::Refresh)?;
        self.cache
            .store_refresh_token(&principal.username, &refresh.token, self.settings.refresh_ttl)
            .await
            .store_err("Failed to register refresh session")?;

        info!(username = %principal.username, user_id = principal.id, "Login succeeded");
        Ok(LoginResponse::new(
            access.token,
            refresh.token,
            self.settings.access_ttl,
            UserInfo::from(&principal),
        ))
    }

    /// Exchange the active refresh token for a new access token. The refresh
    /// token itself is returned unchanged.
    pub async fn refresh(&self, refresh_token: &str) -> Result<LoginResponse, AuthError> {
        let claims = self.codec.decode(refresh_token)?;
        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::WrongTokenKind);
        }

        // Registry before blacklist: a logged-out refresh token reports SessionMismatch
        let active = self
            .cache
            .refresh_token(&claims.sub)
            .await
            .store_err("Failed to read refresh session")?;
        if active.as_deref() != Some(refresh_token) {
            warn!(username = %claims.sub, "Refresh rejected: not the active session");
            return Err(AuthError::SessionMismatch);
        }

        if self
            .cache
            .is_blacklisted(refresh_token)
            .await
            .store_err("Failed to check token blacklist")?
        {
            return Err(AuthError::TokenRevoked);
        }

        let principal = self
            .users
            .find_by_username(&claims.sub)
            .await
            .store_err("Failed to load user")?
            .filter(|p| p.id == claims.uid)
            .ok_or(AuthError::InvalidToken)?;
        let principal = self.guard.check_principal(principal).await?;
        if !principal.enabled {
            return Err(AuthError::AccountDisabled);
        }

        let access = self.issue(&principal, TokenKind::Access)?;
        debug!(username = %principal.username, "Access token refreshed");
        Ok(LoginResponse::new(
            access.token,
            refresh_token.to_string(),
            self.settings.access_ttl,
            UserInfo::from(&principal),
        ))
    }

    /// Revoke whichever of the two tokens carry a valid signature and end the
    /// user's refresh session. Absent or malformed tokens are skipped.
    ///
    /// Each blacklist insertion is attempted independently; any cache fault
    /// is reported as `LogoutFailed` once all of them have been tried.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut username = None;
        let mut faulted = false;

        for token in [access_token, refresh_token].into_iter().flatten() {
            let claims = match self.codec.verify_signature(token) {
                Ok(claims) => claims,
                Err(e) => {
                    debug!(error = %e, "Ignoring unverifiable token on logout");
                    continue;
                }
            };

            let ttl = self.remaining(claims.expires_at_ms());
            if let Err(e) = self.cache.blacklist(token, ttl).await {
                error!(error = %e, kind = claims.kind.as_str(), "Failed to blacklist token");
                faulted = true;
            }
            username.get_or_insert(claims.sub);
        }

        if let Some(username) = &username {
            if let Err(e) = self.cache.remove_refresh_token(username).await {
                error!(error = %e, username = %username, "Failed to remove refresh session");
                faulted = true;
            }
        }

        if faulted {
            return Err(AuthError::LogoutFailed);
        }
        if let Some(username) = username {
            info!(username = %username, "Logged out");
        }
        Ok(())
    }

    /// Resolve an access token into the caller's principal context.
    pub async fn authenticate(&self, token: &str) -> Result<AuthenticatedPrincipal, AuthError> {
        let claims = self.codec.decode_kind(token, TokenKind::Access)?;

        if self
            .cache
            .is_blacklisted(token)
            .await
            .store_err("Failed to check token blacklist")?
        {
            return Err(AuthError::TokenRevoked);
        }

        let principal = self
            .users
            .find_by_id(claims.uid)
            .await
            .store_err("Failed to load user")?
            .filter(|p| p.username == claims.sub)
            .ok_or(AuthError::InvalidToken)?;
        if !principal.enabled {
            return Err(AuthError::AccountDisabled);
        }

        Ok(AuthenticatedPrincipal::new(
            principal,
            token.to_string(),
            claims,
        ))
    }

    /// Create an enabled user holding `role`.
    pub async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
        role: &str,
    ) -> Result<i64, AuthError> {
        if self
            .users
            .username_exists(username)
            .await
            .store_err("Failed to check username")?
        {
            return Err(AuthError::conflict("Username already exists"));
        }
        if let Some(email) = email {
            if self
                .users
                .email_exists(email)
                .await
                .store_err("Failed to check email")?
            {
                return Err(AuthError::conflict("Email already registered"));
            }
        }

        let password_hash = self.hasher.hash_blocking(password).await.map_err(|e| {
            error!(error = %e, "Failed to hash password");
            AuthError::Internal
        })?;

        let id = self
            .users
            .create(&NewUser {
                username,
                email,
                password_hash: &password_hash,
            })
            .await
            .map_err(|e| {
                if e.as_database_error()
                    .is_some_and(|d| d.is_unique_violation())
                {
                    AuthError::conflict("Username or email already registered")
                } else {
                    error!(error = %e, "Failed to create user");
                    AuthError::StoreUnavailable
                }
            })?;
        self.users
            .assign_role(id, role)
            .await
            .store_err("Failed to assign role")?;

        info!(username = %username, user_id = id, role = %role, "User created");
        Ok(id)
    }

    /// Register a new account with the default role.
    pub async fn register(&self, registration: &Registration<'_>) -> Result<i64, AuthError> {
        validate_username(registration.username)?;
        validate_password(registration.password)?;
        validate_confirmation(registration.password, registration.confirm_password)?;
        validate_email(registration.email)?;

        self.create_user(
            registration.username,
            Some(registration.email),
            registration.password,
            DEFAULT_ROLE,
        )
        .await
    }

    /// Change the caller's password. The access token used for the request is
    /// revoked and the refresh session ended, so the caller has to log in again.
    pub async fn change_password(
        &self,
        caller: &AuthenticatedPrincipal,
        change: &PasswordChange<'_>,
    ) -> Result<(), AuthError> {
        let principal = self
            .users
            .find_by_id(caller.id)
            .await
            .store_err("Failed to load user")?
            .ok_or(AuthError::InvalidToken)?;

        if !self
            .hasher
            .verify_blocking(change.old_password, &principal.password_hash)
            .await
        {
            warn!(username = %principal.username, "Password change rejected: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        validate_password(change.new_password)?;
        validate_confirmation(change.new_password, change.confirm_new_password)?;
        if change.new_password == change.old_password {
            return Err(AuthError::validation(
                "New password must differ from the current password",
            ));
        }

        let password_hash = self
            .hasher
            .hash_blocking(change.new_password)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to hash password");
                AuthError::Internal
            })?;
        self.users
            .update_password(principal.id, &password_hash)
            .await
            .store_err("Failed to update password")?;

        let expires_at = self.codec.expires_at(&caller.token)?;
        self.cache
            .blacklist(&caller.token, self.remaining(expires_at))
            .await
            .store_err("Failed to blacklist token")?;
        self.cache
            .remove_refresh_token(&principal.username)
            .await
            .store_err("Failed to remove refresh session")?;

        info!(username = %principal.username, "Password changed");
        Ok(())
    }

    /// All non-deleted users.
    pub async fn list_users(&self) -> Result<Vec<UserSummary>, AuthError> {
        self.users
            .list_active()
            .await
            .store_err("Failed to list users")
    }
}
