//! In-process cache backed by a concurrent map.
//!
//! Suitable for a single instance or for tests. Entries are expired lazily on
//! read and eagerly by [`ExpiringCache::purge_expired`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{CacheError, ExpiringCache};
use crate::clock::{Clock, duration_ms};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at_ms: i64,
}

impl CacheEntry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }
}

#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        self.clock.now_ms().saturating_add(duration_ms(ttl))
    }
}

#[async_trait]
impl ExpiringCache for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let expires_at_ms = self.expiry(ttl);
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now_ms();
        let live = self
            .entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));

        match live {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| !entry.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = self.clock.now_ms();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let now = self.clock.now_ms();
        Ok(self.entries.get(key).and_then(|entry| {
            entry
                .is_live(now)
                .then(|| Duration::from_millis((entry.expires_at_ms - now) as u64))
        }))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CacheError> {
        let now = self.clock.now_ms();
        let expires_at_ms = self.expiry(ttl);

        // The entry guard holds the shard lock, making this read-modify-write atomic.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = if occupied.get().is_live(now) {
                    occupied
                        .get()
                        .value
                        .parse::<i64>()
                        .map_err(|_| CacheError::NotACounter {
                            key: key.to_string(),
                        })?
                } else {
                    0
                };
                let next = current + 1;
                occupied.insert(CacheEntry {
                    value: next.to_string(),
                    expires_at_ms,
                });
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    value: "1".to_string(),
                    expires_at_ms,
                });
                Ok(1)
            }
        }
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
