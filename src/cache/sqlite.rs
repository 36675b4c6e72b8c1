//! Cache stored in the shared SQLite database.
//!
//! Every instance pointing at the same database file sees the same blacklist,
//! session registry and failure counters. Expiry is stored as Unix milliseconds
//! and compared against the injected clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use super::{CacheError, ExpiringCache};
use crate::clock::{Clock, duration_ms};

#[derive(Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteCache {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        self.clock.now_ms().saturating_add(duration_ms(ttl))
    }
}

#[async_trait]
impl ExpiringCache for SqliteCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(self.expiry(ttl))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(self.clock.now_ms())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(self.clock.now_ms())
            .execute(&self.pool)
            .await?;
        // Drop any expired leftover as well
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let now = self.clock.now_ms();
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT expires_at FROM cache_entries WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(now)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(expires_at,)| Duration::from_millis((expires_at - now) as u64)))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CacheError> {
        // Single statement, so SQLite applies it atomically. A live
        // non-numeric value is left untouched and rejected after parsing.
        let (value,): (String,) = sqlx::query_as(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, '1', ?2)
             ON CONFLICT(key) DO UPDATE SET
                value = CASE
                    WHEN cache_entries.expires_at <= ?3 THEN '1'
                    WHEN cache_entries.value = '' OR cache_entries.value GLOB '*[^0-9]*'
                        THEN cache_entries.value
                    ELSE CAST(CAST(cache_entries.value AS INTEGER) + 1 AS TEXT)
                END,
                expires_at = CASE
                    WHEN cache_entries.expires_at > ?3
                        AND (cache_entries.value = '' OR cache_entries.value GLOB '*[^0-9]*')
                        THEN cache_entries.expires_at
                    ELSE excluded.expires_at
                END
             RETURNING value",
        )
        .bind(key)
        .bind(self.expiry(ttl))
        .bind(self.clock.now_ms())
        .fetch_one(&self.pool)
        .await?;

        value.parse::<i64>().map_err(|_| CacheError::NotACounter {
            key: key.to_string(),
        })
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(self.clock.now_ms())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::Database;

    async fn cache() -> (SqliteCache, Arc<ManualClock>) {
        let db = Database::open(":memory:").await.unwrap();
        let clock = Arc::new(ManualClock::new(5_000_000));
        (db.cache(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_set_overwrites_and_expires() {
        let (cache, clock) = cache().await;

        cache.set("k", "a", Duration::from_secs(10)).await.unwrap();
        cache.set("k", "b", Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("b"));
        assert_eq!(
            cache.ttl("k").await.unwrap(),
            Some(Duration::from_secs(10))
        );

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_reports_live_entries_only() {
        let (cache, clock) = cache().await;

        cache.set("live", "x", Duration::from_secs(10)).await.unwrap();
        cache.set("stale", "x", Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));

        assert!(cache.delete("live").await.unwrap());
        assert!(!cache.delete("stale").await.unwrap());
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_counts_and_resets() {
        let (cache, clock) = cache().await;
        let ttl = Duration::from_secs(60);

        assert_eq!(cache.increment("c", ttl).await.unwrap(), 1);
        assert_eq!(cache.increment("c", ttl).await.unwrap(), 2);
        assert_eq!(cache.increment("c", ttl).await.unwrap(), 3);
        assert_eq!(cache.get("c").await.unwrap().as_deref(), Some("3"));

        clock.advance(ttl);
        assert_eq!(cache.increment("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_counter() {
        let (cache, clock) = cache().await;
        let ttl = Duration::from_secs(10);
        cache.set("c", "abc", ttl).await.unwrap();

        assert!(matches!(
            cache.increment("c", ttl).await,
            Err(CacheError::NotACounter { .. })
        ));
        assert_eq!(cache.get("c").await.unwrap().as_deref(), Some("abc"));

        // Once expired the key counts from scratch
        clock.advance(ttl);
        assert_eq!(cache.increment("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (cache, clock) = cache().await;
        cache.set("a", "1", Duration::from_secs(1)).await.unwrap();
        cache.set("b", "1", Duration::from_secs(1)).await.unwrap();
        cache.set("c", "1", Duration::from_secs(100)).await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.purge_expired().await.unwrap(), 2);
        assert!(cache.has("c").await.unwrap());
    }
}
