//! Failed-login tracking and temporary account lockout.
//!
//! Consecutive failures are counted in the cache under `login_fail:<username>`
//! with a TTL equal to the lock window, refreshed on every failure. Reaching the
//! threshold persists a lock timestamp on the user row and clears the counter.
//! The persisted timestamp is what enforces the lock, so it survives a cache
//! flush or a restart. An expired lock is cleared lazily by the next login
//! attempt for that username.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::errors::{AuthError, ResultExt};
use crate::cache::SessionCache;
use crate::clock::{Clock, duration_ms};
use crate::db::{Principal, UserStore};

/// Lockout state of a username.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Clear,
    Accumulating(u32),
    /// Locked until the given Unix millisecond
    Locked { until_ms: i64 },
}

#[derive(Clone)]
pub struct LoginGuard {
    users: UserStore,
    cache: SessionCache,
    clock: Arc<dyn Clock>,
    max_failures: u32,
    lock_duration: Duration,
}

impl LoginGuard {
    pub fn new(
        users: UserStore,
        cache: SessionCache,
        clock: Arc<dyn Clock>,
        max_failures: u32,
        lock_duration: Duration,
    ) -> Self {
        Self {
            users,
            cache,
            clock,
            max_failures: max_failures.max(1),
            lock_duration,
        }
    }

    fn lock_until(&self, locked_at_ms: i64) -> i64 {
        locked_at_ms.saturating_add(duration_ms(self.lock_duration))
    }

    /// Returns the lock expiry if `principal` is locked right now.
    fn active_lock(&self, principal: &Principal) -> Option<i64> {
        let until = self.lock_until(principal.lock_time_ms?);
        (self.clock.now_ms() < until).then_some(until)
    }

    /// Load a user and reject the attempt if the account is locked.
    /// Returns `None` for unknown usernames.
    pub async fn check_before_auth(&self, username: &str) -> Result<Option<Principal>, AuthError> {
        let principal = self
            .users
            .find_by_username(username)
            .await
            .store_err("Failed to load user")?;

        match principal {
            Some(principal) => self.check_principal(principal).await.map(Some),
            None => Ok(None),
        }
    }

    /// Reject a locked principal, or clear a lock that has run out.
    pub async fn check_principal(&self, mut principal: Principal) -> Result<Principal, AuthError> {
        let Some(locked_at) = principal.lock_time_ms else {
            return Ok(principal);
        };

        let until = self.lock_until(locked_at);
        let now = self.clock.now_ms();
        if now < until {
            let remaining_minutes = (until - now + 59_999) / 60_000;
            return Err(AuthError::AccountLocked {
                unlock_at_ms: until,
                remaining_minutes,
            });
        }

        self.users
            .unlock(principal.id)
            .await
            .store_err("Failed to clear expired lock")?;
        self.cache
            .clear_failures(&principal.username)
            .await
            .store_err("Failed to clear failure counter")?;
        info!(username = %principal.username, "Lock expired, account unlocked");

        principal.lock_time_ms = None;
        principal.failure_count = 0;
        Ok(principal)
    }

    /// Record a failed attempt for `username`. Unknown usernames are not
    /// tracked.
    pub async fn on_failure(&self, username: &str) -> Result<GuardState, AuthError> {
        let principal = self
            .users
            .find_by_username(username)
            .await
            .store_err("Failed to load user")?;

        match principal {
            Some(principal) => self.record_failure(&principal).await,
            None => Ok(GuardState::Clear),
        }
    }

    /// Record a failed attempt for an already loaded principal.
    pub async fn record_failure(&self, principal: &Principal) -> Result<GuardState, AuthError> {
        // Attempts against a locked account must not extend the lock
        if let Some(until_ms) = self.active_lock(principal) {
            return Ok(GuardState::Locked { until_ms });
        }

        let failures = self
            .cache
            .record_failure(&principal.username, self.lock_duration)
            .await
            .store_err("Failed to record login failure")?;
        warn!(username = %principal.username, failures, "Failed login attempt");

        if failures < self.max_failures {
            return Ok(GuardState::Accumulating(failures));
        }

        let now = self.clock.now_ms();
        self.users
            .lock(principal.id, now, failures)
            .await
            .store_err("Failed to lock account")?;
        self.cache
            .clear_failures(&principal.username)
            .await
            .store_err("Failed to clear failure counter")?;
        warn!(
            username = %principal.username,
            failures,
            lock_minutes = self.lock_duration.as_secs() / 60,
            "Account locked"
        );

        Ok(GuardState::Locked {
            until_ms: self.lock_until(now),
        })
    }

    /// Reset all failure state after a successful login.
    pub async fn on_success(&self, principal: &Principal) -> Result<(), AuthError> {
        self.cache
            .clear_failures(&principal.username)
            .await
            .store_err("Failed to clear failure counter")?;

        if principal.lock_time_ms.is_some() {
            self.users
                .unlock(principal.id)
                .await
                .store_err("Failed to clear lock")?;
        } else if principal.failure_count > 0 {
            self.users
                .update_failure_count(principal.id, 0)
                .await
                .store_err("Failed to reset failure count")?;
        }
        Ok(())
    }

    /// Current lockout state of `username`.
    pub async fn state(&self, username: &str) -> Result<GuardState, AuthError> {
        let principal = self
            .users
            .find_by_username(username)
            .await
            .store_err("Failed to load user")?;

        if let Some(until_ms) = principal.as_ref().and_then(|p| self.active_lock(p)) {
            return Ok(GuardState::Locked { until_ms });
        }

        let failures = self
            .cache
            .failure_count(username)
            .await
            .store_err("Failed to read failure counter")?;
        Ok(match failures {
            0 => GuardState::Clear,
            n => GuardState::Accumulating(n),
        })
    }
}
