//! Fixed-window rate limiting
//!
//! Counts requests per identity inside fixed, non-overlapping time windows.
//! A burst straddling a window boundary can admit up to twice the limit
//! within one window length of wall-clock time; that approximation is
//! accepted by design.
//!
//! The check and the increment are deliberately separate operations. The
//! dispatcher calls [`RateLimiter::is_within_limit`] first and
//! [`RateLimiter::record_hit`] only for admitted requests, so two concurrent
//! requests at the limit boundary may both be admitted. Collapsing the pair
//! into an atomic try-consume would tighten observable behavior under
//! contention and is intentionally not done here.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit store error: {0}")]
    Store(#[from] redis::RedisError),
}

/// Per-identity fixed-window counter
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// True if the current window's count for `identity` is strictly below
    /// `limit`. No prior record means within limit.
    async fn is_within_limit(
        &self,
        identity: &str,
        limit: u32,
        window_seconds: u64,
    ) -> Result<bool, RateLimitError>;

    /// Increment the current window's count for `identity` and return the
    /// post-increment value, creating the window record if absent.
    async fn record_hit(
        &self,
        identity: &str,
        window_seconds: u64,
    ) -> Result<u64, RateLimitError>;
}

fn window_index(window_seconds: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    now / window_seconds.max(1)
}

struct CounterEntry {
    count: u64,
    last_touched: Instant,
}

/// In-process limiter backed by an expiring map.
///
/// Entries whose window is more than two window lengths stale are swept
/// lazily on each hit to bound memory.
pub struct MemoryRateLimiter {
    counters: DashMap<String, CounterEntry>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    fn key(identity: &str, window_seconds: u64) -> String {
        format!("{}:{}", identity, window_index(window_seconds))
    }

    fn sweep_stale(&self, window_seconds: u64) {
        let horizon = Duration::from_secs(window_seconds.saturating_mul(2));
        let now = Instant::now();
        self.counters
            .retain(|_, entry| now.duration_since(entry.last_touched) <= horizon);
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn is_within_limit(
        &self,
        identity: &str,
        limit: u32,
        window_seconds: u64,
    ) -> Result<bool, RateLimitError> {
        let key = Self::key(identity, window_seconds);
        let count = self.counters.get(&key).map(|entry| entry.count).unwrap_or(0);
        Ok(count < u64::from(limit))
    }

    async fn record_hit(
        &self,
        identity: &str,
        window_seconds: u64,
    ) -> Result<u64, RateLimitError> {
        let key = Self::key(identity, window_seconds);
        let count = {
            let mut entry = self.counters.entry(key).or_insert(CounterEntry {
                count: 0,
                last_touched: Instant::now(),
            });
            entry.count += 1;
            entry.last_touched = Instant::now();
            entry.count
        };

        self.sweep_stale(window_seconds);

        Ok(count)
    }
}

/// Shared-store limiter where the increment is atomic at the store and
/// expiry is delegated to the store's TTL.
pub struct RedisRateLimiter {
    connection: redis::aio::ConnectionManager,
}

impl RedisRateLimiter {
    pub async fn connect(url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self { connection })
    }

    fn key(identity: &str, window_seconds: u64) -> String {
        format!("rate_limit:{}:{}", identity, window_index(window_seconds))
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn is_within_limit(
        &self,
        identity: &str,
        limit: u32,
        window_seconds: u64,
    ) -> Result<bool, RateLimitError> {
        let key = Self::key(identity, window_seconds);
        let mut connection = self.connection.clone();
        let count: Option<u64> = connection.get(&key).await?;
        Ok(count.unwrap_or(0) < u64::from(limit))
    }

    async fn record_hit(
        &self,
        identity: &str,
        window_seconds: u64,
    ) -> Result<u64, RateLimitError> {
        let key = Self::key(identity, window_seconds);
        let mut connection = self.connection.clone();
        let count: u64 = connection.incr(&key, 1).await?;
        if count == 1 {
            let _: () = connection.expire(&key, window_seconds as i64).await?;
        }
        Ok(count)
    }
}
