//! Shared rate-limit store
//!
//! The shared store keeps one sorted set per bucket key, scored by request
//! timestamp. Pruning, counting and the conditional insert run as a single
//! server-side script so concurrent callers sharing an identifier cannot both
//! pass the count check before either inserts.
//!
//! The Redis connection is established on first use and retried on every
//! check until it succeeds, so a store that is down at startup is picked up
//! once it comes back. Until then each attempt fails like any other store
//! error and feeds the breaker.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::sync::OnceCell;

use crate::error::StoreError;

use super::WindowDecision;

/// Backend able to run an atomic sliding-window check
#[async_trait]
pub trait SharedRateLimitStore: Send + Sync {
    /// Prune entries at or before `now_ms - window_ms`, count the rest and
    /// record `now_ms` only when the count is below `limit`.
    async fn hit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<WindowDecision, StoreError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)
if count >= limit then
    return {0, count}
end

redis.call('ZADD', key, now, ARGV[4])
redis.call('PEXPIRE', key, window)
return {1, count + 1}
"#;

/// Redis-backed shared store
pub struct RedisWindowStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    script: Script,
}

impl std::fmt::Debug for RedisWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWindowStore")
            .field("connected", &self.conn.initialized())
            .finish_non_exhaustive()
    }
}

impl RedisWindowStore {
    /// Create a store for `url` without connecting.
    ///
    /// Fails only when the URL itself is invalid.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }

    /// Establish the connection now instead of on the first check
    pub async fn ensure_connected(&self) -> Result<(), StoreError> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = ConnectionManager::new(self.client.clone()).await?;
                tracing::info!("Connected to shared rate-limit store");
                Ok::<_, redis::RedisError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl SharedRateLimitStore for RedisWindowStore {
    async fn hit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<WindowDecision, StoreError> {
        let mut conn = self.connection().await?;
        // Members must be unique even for identical timestamps.
        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());

        let mut invocation = self.script.prepare_invoke();
        invocation
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(member);

        let (allowed, count): (i64, i64) = invocation.invoke_async(&mut conn).await?;
        if count < 0 {
            return Err(StoreError::Protocol(format!("negative count {count}")));
        }

        Ok(WindowDecision {
            allowed: allowed == 1,
            count: count as u32,
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, RateLimitConfig};
    use crate::observability::TelemetryMetrics;
    use crate::ratelimit::{BreakerHealth, RateLimiter};
    use crate::types::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisWindowStore::open("not a url").is_err());
        assert!(RedisWindowStore::open("redis://127.0.0.1:6379").is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_store_feeds_breaker() {
        // Nothing listens on port 1.
        let store = Arc::new(RedisWindowStore::open("redis://127.0.0.1:1").unwrap());
        assert!(store.ensure_connected().await.is_err());

        let config = RateLimitConfig {
            io_timeout_ms: 200,
            breaker: BreakerConfig {
                failure_threshold: 2,
                cool_down_secs: 30,
            },
            ..Default::default()
        };
        let limiter = RateLimiter::new(
            &config,
            Some(store as Arc<dyn SharedRateLimitStore>),
            Arc::new(ManualClock::new(0)),
            Arc::new(TelemetryMetrics::new().unwrap()),
        );

        // Admission keeps working on the local path.
        limiter.check("c", 10, 60, "p").await.unwrap();
        limiter.check("c", 10, 60, "p").await.unwrap();
        assert_eq!(limiter.store_health(), Some(BreakerHealth::Open));
    }
}
