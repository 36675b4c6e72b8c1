//! Scheduled cleanup of expired cache entries and idle rate limiter state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::cache::ExpiringCache;
use crate::rate_limit::RateLimitConfig;

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Run all cleanup tasks once.
pub async fn run_cleanup(cache: &dyn ExpiringCache, rate_limit: &RateLimitConfig) {
    match cache.purge_expired().await {
        Ok(count) if count > 0 => info!("Purged {} expired cache entries", count),
        Ok(_) => {}
        Err(e) => error!("Failed to purge expired cache entries: {}", e),
    }

    rate_limit.retain_recent();
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    cache: Arc<dyn ExpiringCache>,
    rate_limit: Arc<RateLimitConfig>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(cache.as_ref(), &rate_limit).await;
        }
    })
}
