//! Admission control
//!
//! Sliding-window log rate limiting in front of every entry point.
//!
//! # Architecture
//!
//! ```text
//!   check(identifier, limit, window, prefix)
//!            │
//!            ▼
//!   ┌─────────────────┐  closed / trial   ┌──────────────────────┐
//!   │  StoreBreaker   │──────────────────▶│ SharedRateLimitStore │── ok ──▶ decision
//!   └────────┬────────┘                   └──────────┬───────────┘
//!            │ open                                  │ error / timeout
//!            ▼                                       ▼
//!   ┌─────────────────────────────────────────────────────────────┐
//!   │                     LocalWindowStore                        │──▶ decision
//!   └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! When the shared store cannot answer, the limiter fails open to the local
//! store: the request is still rate limited, but only against this process's
//! own counts. Availability of the admission path wins over cross-instance
//! accuracy. Store failures are logged and counted, never returned to callers.

mod breaker;
mod identity;
mod local;
pub mod policy;
mod store;

use std::sync::Arc;
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::error::{RateLimitExceeded, StoreError};
use crate::observability::TelemetryMetrics;
use crate::types::Clock;

use breaker::secs_to_ms;

pub use breaker::{BreakerHealth, StoreBreaker};
pub use identity::{client_identity, UNKNOWN_CLIENT};
pub use local::LocalWindowStore;
pub use policy::RateLimitPolicy;
pub use store::{RedisWindowStore, SharedRateLimitStore};

/// Outcome of one sliding-window check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    /// Whether the request was admitted (and recorded)
    pub allowed: bool,

    /// Entries in the window after the check
    pub count: u32,
}

/// Rate limiter with a shared store and a local fallback
pub struct RateLimiter {
    /// Shared store, if one is configured
    shared: Option<Arc<dyn SharedRateLimitStore>>,

    /// Local fallback store
    local: LocalWindowStore,

    /// Breaker guarding the shared store
    breaker: StoreBreaker,

    /// Upper bound for one shared-store round trip
    io_timeout: Duration,

    /// Namespace prepended to bucket keys
    namespace: String,

    clock: Arc<dyn Clock>,
    metrics: Arc<TelemetryMetrics>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("shared", &self.shared.as_ref().map(|s| s.name()))
            .field("breaker", &self.breaker.health())
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter; `shared = None` runs on the local store only
    pub fn new(
        config: &RateLimitConfig,
        shared: Option<Arc<dyn SharedRateLimitStore>>,
        clock: Arc<dyn Clock>,
        metrics: Arc<TelemetryMetrics>,
    ) -> Self {
        Self {
            shared,
            local: LocalWindowStore::new(),
            breaker: StoreBreaker::new(&config.breaker, config.io_timeout()),
            io_timeout: config.io_timeout(),
            namespace: config.key_namespace.clone(),
            clock,
            metrics,
        }
    }

    /// Admit or reject one request for `identifier`.
    ///
    /// Fails with [`RateLimitExceeded`] when `limit` requests were already
    /// admitted within the trailing `window_secs`.
    pub async fn check(
        &self,
        identifier: &str,
        limit: u32,
        window_secs: u64,
        key_prefix: &str,
    ) -> Result<(), RateLimitExceeded> {
        let now_ms = self.clock.now_ms();
        let window_ms = secs_to_ms(window_secs);
        let key = format!("{}:{}:{}", self.namespace, key_prefix, identifier);

        let decision = match self.shared_hit(&key, now_ms, window_ms, limit).await {
            Some(decision) => decision,
            None => {
                self.metrics.rate_limit_local_decisions.inc();
                self.local.hit(&key, now_ms, window_ms, limit)
            }
        };

        if decision.allowed {
            tracing::trace!(key = %key, count = decision.count, limit, "Request admitted");
            Ok(())
        } else {
            self.metrics
                .rate_limit_rejections
                .with_label_values(&[key_prefix])
                .inc();
            tracing::debug!(
                identifier = %identifier,
                key_prefix = %key_prefix,
                limit,
                window_secs,
                "Rate limit exceeded"
            );
            Err(RateLimitExceeded::new(limit, window_secs))
        }
    }

    /// Check against a predefined policy
    pub async fn check_policy(
        &self,
        identifier: &str,
        policy: &RateLimitPolicy,
    ) -> Result<(), RateLimitExceeded> {
        self.check(identifier, policy.limit, policy.window_secs, policy.key_prefix)
            .await
    }

    /// Shared-store decision, or `None` when the local path must decide
    async fn shared_hit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Option<WindowDecision> {
        let store = self.shared.as_ref()?;
        if !self.breaker.allow_request(now_ms) {
            return None;
        }

        let result = match tokio::time::timeout(
            self.io_timeout,
            store.hit(key, now_ms, window_ms, limit),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.io_timeout.as_millis() as u64)),
        };

        match result {
            Ok(decision) => {
                self.breaker.record_success();
                self.metrics.rate_limit_shared_decisions.inc();
                Some(decision)
            }
            Err(e) => {
                self.breaker.record_failure(now_ms);
                self.metrics.shared_store_errors.inc();
                tracing::warn!(
                    store = store.name(),
                    error = %e,
                    "Shared rate-limit store failed, using local fallback"
                );
                None
            }
        }
    }

    /// Health of the shared-store path; `None` when no shared store is configured
    pub fn store_health(&self) -> Option<BreakerHealth> {
        self.shared.as_ref().map(|_| self.breaker.health())
    }

    /// Drop idle local buckets
    pub fn sweep_local(&self) -> usize {
        self.local.sweep(self.clock.now_ms())
    }
}
