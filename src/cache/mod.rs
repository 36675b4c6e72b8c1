//! Expiring key-value cache shared by every service instance.
//!
//! The cache holds three kinds of short-lived state, partitioned by key prefix:
//! - `blacklist:token:<token>` - revoked tokens, kept until their natural expiry
//! - `refresh_token:<username>` - the single active refresh token per user
//! - `login_fail:<username>` - consecutive failed login counter
//!
//! A cache fault is reported as [`CacheError`] and never treated as "key absent".

mod memory;
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

const BLACKLIST_PREFIX: &str = "blacklist:token:";
const REFRESH_TOKEN_PREFIX: &str = "refresh_token:";
const LOGIN_FAIL_PREFIX: &str = "login_fail:";

/// Marker value stored for blacklisted tokens.
const BLACKLISTED: &str = "blacklisted";

/// Errors raised by cache backends.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("cache value for key {key} is not a counter")]
    NotACounter { key: String },
}

/// Storage contract for an expiring key-value cache.
///
/// Implementations must provide atomic read-modify-write per key
/// ([`ExpiringCache::increment`]); no cross-key atomicity is assumed.
#[async_trait]
pub trait ExpiringCache: Send + Sync {
    /// Store `value` under `key`, replacing any previous value (last write wins).
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Fetch a live value.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Remove a key. Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Whether a live value exists.
    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remaining time to live of a live value.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Atomically increment an integer counter, resetting its TTL to `ttl`.
    /// A missing or expired counter starts from zero.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CacheError>;

    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

/// Typed view over an [`ExpiringCache`] for the authentication core.
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<dyn ExpiringCache>,
}

impl SessionCache {
    pub fn new(inner: Arc<dyn ExpiringCache>) -> Self {
        Self { inner }
    }

    /// The underlying cache (for maintenance tasks).
    pub fn backend(&self) -> &Arc<dyn ExpiringCache> {
        &self.inner
    }

    /// Revoke a token for `ttl`. A zero TTL is a no-op: the token has
    /// already expired and needs no protection.
    pub async fn blacklist(&self, token: &str, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }
        self.inner
            .set(&blacklist_key(token), BLACKLISTED, ttl)
            .await
    }

    pub async fn is_blacklisted(&self, token: &str) -> Result<bool, CacheError> {
        self.inner.has(&blacklist_key(token)).await
    }

    /// Register `token` as the active refresh token for `username`,
    /// superseding any previous one.
    pub async fn store_refresh_token(
        &self,
        username: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }
        self.inner
            .set(&refresh_token_key(username), token, ttl)
            .await
    }

    pub async fn refresh_token(&self, username: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(&refresh_token_key(username)).await
    }

    pub async fn remove_refresh_token(&self, username: &str) -> Result<bool, CacheError> {
        self.inner.delete(&refresh_token_key(username)).await
    }

    /// Current consecutive failure count (0 when absent or expired).
    pub async fn failure_count(&self, username: &str) -> Result<u32, CacheError> {
        let key = login_fail_key(username);
        match self.inner.get(&key).await? {
            None => Ok(0),
            Some(value) => value
                .parse::<u32>()
                .map_err(|_| CacheError::NotACounter { key }),
        }
    }

    /// Record one more failure; the counter lives for `window` from now.
    pub async fn record_failure(&self, username: &str, window: Duration) -> Result<u32, CacheError> {
        let count = self.inner.increment(&login_fail_key(username), window).await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    pub async fn clear_failures(&self, username: &str) -> Result<(), CacheError> {
        self.inner.delete(&login_fail_key(username)).await.map(|_| ())
    }
}

fn blacklist_key(token: &str) -> String {
    format!("{}{}", BLACKLIST_PREFIX, token)
}

fn refresh_token_key(username: &str) -> String {
    format!("{}{}", REFRESH_TOKEN_PREFIX, username)
}

fn login_fail_key(username: &str) -> String {
    format!("{}{}", LOGIN_FAIL_PREFIX, username)
}
