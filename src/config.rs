//! Pipeline configuration
//!
//! Every section deserializes from TOML with per-field defaults, so a partial
//! file (or none at all) yields a working configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ratelimit::policy::{PolicyKind, PolicyLimits, RateLimitPolicy};
use crate::sla::{Plan, PlanThresholds};
use crate::types::TenantId;

/// Risk score at or above which a sample is visible on the regulator channel
pub const DEFAULT_REGULATOR_RISK_THRESHOLD: u8 = 70;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Admission control
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-tenant statistics window
    #[serde(default)]
    pub window: WindowConfig,

    /// Plan thresholds and tenant plan assignment
    #[serde(default)]
    pub plans: PlanConfig,

    /// Degraded-mode controller
    #[serde(default)]
    pub failsafe: FailSafeConfig,

    /// Alert rules and delivery
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Broadcast fan-out
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Minimum risk score forwarded to regulator viewers
    #[serde(default = "default_regulator_risk_threshold")]
    pub regulator_risk_threshold: u8,
}

fn default_regulator_risk_threshold() -> u8 {
    DEFAULT_REGULATOR_RISK_THRESHOLD
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            window: WindowConfig::default(),
            plans: PlanConfig::default(),
            failsafe: FailSafeConfig::default(),
            alerts: AlertConfig::default(),
            broadcast: BroadcastConfig::default(),
            regulator_risk_threshold: default_regulator_risk_threshold(),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(content).map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.window.size == 0 {
            return Err(Error::Configuration("window.size must be > 0".into()));
        }
        if self.failsafe.fallback_chain.is_empty() {
            return Err(Error::Configuration(
                "failsafe.fallback_chain must name at least one provider".into(),
            ));
        }
        if self.broadcast.queue_capacity == 0 || self.broadcast.connection_buffer == 0 {
            return Err(Error::Configuration(
                "broadcast queue and connection buffer must be > 0".into(),
            ));
        }
        if self.alerts.queue_capacity == 0 {
            return Err(Error::Configuration("alerts.queue_capacity must be > 0".into()));
        }
        self.rate_limit.policies.validate()?;
        if self.regulator_risk_threshold > crate::types::MAX_RISK_SCORE {
            return Err(Error::Configuration(
                "regulator_risk_threshold must be within 0..=100".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Shared-store and fallback settings for the rate limiter
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Redis URL of the shared store; `None` runs on the local path only
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Upper bound for one shared-store round trip (milliseconds)
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Namespace prepended to every shared-store key
    #[serde(default = "default_key_namespace")]
    pub key_namespace: String,

    /// Circuit breaker around the shared store
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Per-entry-point admission limits
    #[serde(default)]
    pub policies: PolicyConfig,
}

fn default_io_timeout_ms() -> u64 {
    250
}

fn default_key_namespace() -> String {
    "riskpulse:rl".to_string()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            io_timeout_ms: default_io_timeout_ms(),
            key_namespace: default_key_namespace(),
            breaker: BreakerConfig::default(),
            policies: PolicyConfig::default(),
        }
    }
}

impl RateLimitConfig {
    /// Shared-store I/O timeout as a duration
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Limits of the predefined admission policies
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_standalone_limits")]
    pub standalone: PolicyLimits,

    #[serde(default = "default_proxy_limits")]
    pub proxy: PolicyLimits,

    #[serde(default = "default_regulator_feed_limits")]
    pub regulator_feed: PolicyLimits,

    #[serde(default = "default_connection_handshake_limits")]
    pub connection_handshake: PolicyLimits,

    #[serde(default = "default_ingest_limits")]
    pub ingest: PolicyLimits,
}

fn default_standalone_limits() -> PolicyLimits {
    PolicyKind::Standalone.default_policy().into()
}

fn default_proxy_limits() -> PolicyLimits {
    PolicyKind::Proxy.default_policy().into()
}

fn default_regulator_feed_limits() -> PolicyLimits {
    PolicyKind::RegulatorFeed.default_policy().into()
}

fn default_connection_handshake_limits() -> PolicyLimits {
    PolicyKind::ConnectionHandshake.default_policy().into()
}

fn default_ingest_limits() -> PolicyLimits {
    PolicyKind::Ingest.default_policy().into()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            standalone: default_standalone_limits(),
            proxy: default_proxy_limits(),
            regulator_feed: default_regulator_feed_limits(),
            connection_handshake: default_connection_handshake_limits(),
            ingest: default_ingest_limits(),
        }
    }
}

impl PolicyConfig {
    /// Effective policy for an entry point
    pub fn policy(&self, kind: PolicyKind) -> RateLimitPolicy {
        self.limits(kind).to_policy(kind)
    }

    fn limits(&self, kind: PolicyKind) -> PolicyLimits {
        match kind {
            PolicyKind::Standalone => self.standalone,
            PolicyKind::Proxy => self.proxy,
            PolicyKind::RegulatorFeed => self.regulator_feed,
            PolicyKind::ConnectionHandshake => self.connection_handshake,
            PolicyKind::Ingest => self.ingest,
        }
    }

    fn validate(&self) -> Result<()> {
        for kind in [
            PolicyKind::Standalone,
            PolicyKind::Proxy,
            PolicyKind::RegulatorFeed,
            PolicyKind::ConnectionHandshake,
            PolicyKind::Ingest,
        ] {
            let limits = self.limits(kind);
            if limits.limit == 0 || limits.window_secs == 0 {
                return Err(Error::Configuration(format!(
                    "rate_limit.policies.{}: limit and window_secs must be > 0",
                    kind.default_policy().key_prefix
                )));
            }
        }
        Ok(())
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive store failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the breaker stays open before a trial call
    #[serde(default = "default_cool_down_secs")]
    pub cool_down_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cool_down_secs() -> u64 {
    30
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cool_down_secs: default_cool_down_secs(),
        }
    }
}

// ============================================================================
// Statistics window
// ============================================================================

/// Sliding metrics window settings
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Maximum samples retained per tenant
    #[serde(default = "default_window_size")]
    pub size: usize,

    /// Trailing range used for uptime (seconds)
    #[serde(default = "default_uptime_range_secs")]
    pub uptime_range_secs: u64,
}

fn default_window_size() -> usize {
    20
}

fn default_uptime_range_secs() -> u64 {
    60
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size: default_window_size(),
            uptime_range_secs: default_uptime_range_secs(),
        }
    }
}

// ============================================================================
// Plans
// ============================================================================

/// Plan thresholds and the tenant to plan directory
#[derive(Debug, Clone, Deserialize)]
pub struct PlanConfig {
    #[serde(default = "PlanThresholds::free")]
    pub free: PlanThresholds,

    #[serde(default = "PlanThresholds::pro")]
    pub pro: PlanThresholds,

    #[serde(default = "PlanThresholds::enterprise")]
    pub enterprise: PlanThresholds,

    /// Plan used for tenants with no explicit assignment
    #[serde(default)]
    pub default_plan: Plan,

    /// Explicit tenant plan assignments
    #[serde(default)]
    pub tenants: HashMap<TenantId, Plan>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            free: PlanThresholds::free(),
            pro: PlanThresholds::pro(),
            enterprise: PlanThresholds::enterprise(),
            default_plan: Plan::default(),
            tenants: HashMap::new(),
        }
    }
}

impl PlanConfig {
    /// Plan assigned to a tenant
    pub fn plan_for(&self, tenant_id: &str) -> Plan {
        self.tenants
            .get(tenant_id)
            .copied()
            .unwrap_or(self.default_plan)
    }

    /// Thresholds configured for a plan
    pub fn thresholds(&self, plan: Plan) -> PlanThresholds {
        match plan {
            Plan::Free => self.free,
            Plan::Pro => self.pro,
            Plan::Enterprise => self.enterprise,
        }
    }
}

// ============================================================================
// Fail-safe
// ============================================================================

/// Degraded-mode controller settings
#[derive(Debug, Clone, Deserialize)]
pub struct FailSafeConfig {
    /// Ordered provider fallback chain, cycled round-robin
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<String>,

    /// Provider active at startup; defaults to the head of the chain
    #[serde(default)]
    pub initial_provider: Option<String>,

    /// Trigger the controller when an ingest yields an SLA violation
    #[serde(default = "default_true")]
    pub auto_trigger_on_violation: bool,
}

fn default_fallback_chain() -> Vec<String> {
    vec![
        "providerA".to_string(),
        "providerB".to_string(),
        "providerC".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Default for FailSafeConfig {
    fn default() -> Self {
        Self {
            fallback_chain: default_fallback_chain(),
            initial_provider: None,
            auto_trigger_on_violation: true,
        }
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Alert rule and delivery settings
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Error-rate percentage above which an alert fires
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold_pct: f64,

    /// Pending alerts buffered for the sink worker
    #[serde(default = "default_alert_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_error_rate_threshold() -> f64 {
    5.0
}

fn default_alert_queue_capacity() -> usize {
    256
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold_pct: default_error_rate_threshold(),
            queue_capacity: default_alert_queue_capacity(),
        }
    }
}

// ============================================================================
// Broadcast
// ============================================================================

/// Broadcast fan-out settings
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Pending broadcast jobs per hub before drop-oldest kicks in
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Outbound frames buffered per connection
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer: usize,

    /// How long a single delivery may wait on a full connection buffer
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_connection_buffer() -> usize {
    64
}

fn default_send_timeout_ms() -> u64 {
    2_000
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            connection_buffer: default_connection_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl BroadcastConfig {
    /// Per-delivery timeout as a duration
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.window.size, 20);
        assert_eq!(config.window.uptime_range_secs, 60);
        assert_eq!(config.regulator_risk_threshold, 70);
        assert_eq!(
            config.failsafe.fallback_chain,
            vec!["providerA", "providerB", "providerC"]
        );
        assert!(config.rate_limit.redis_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            regulator_risk_threshold = 80

            [window]
            size = 5

            [plans]
            default_plan = "pro"

            [plans.tenants]
            acme = "enterprise"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.size, 5);
        assert_eq!(config.window.uptime_range_secs, 60);
        assert_eq!(config.regulator_risk_threshold, 80);
        assert_eq!(config.plans.plan_for("acme"), Plan::Enterprise);
        assert_eq!(config.plans.plan_for("other"), Plan::Pro);
        assert_eq!(config.broadcast.queue_capacity, 1024);
    }

    #[test]
    fn test_policy_overrides() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [rate_limit.policies.proxy]
            limit = 5
            window_secs = 30

            [rate_limit.policies.ingest]
            limit = 5000
            window_secs = 60
            "#,
        )
        .unwrap();

        let policies = &config.rate_limit.policies;
        let proxy = policies.policy(PolicyKind::Proxy);
        assert_eq!((proxy.key_prefix, proxy.limit, proxy.window_secs), ("proxy", 5, 30));
        assert_eq!(policies.policy(PolicyKind::Ingest).limit, 5000);
        // Untouched policies keep their defaults.
        assert_eq!(
            policies.policy(PolicyKind::Standalone),
            crate::ratelimit::policy::STANDALONE
        );
        assert_eq!(
            policies.policy(PolicyKind::ConnectionHandshake).window_secs,
            120
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(PipelineConfig::from_toml_str(
            "[rate_limit.policies.proxy]\nlimit = 0\nwindow_secs = 60\n"
        )
        .is_err());
        assert!(PipelineConfig::from_toml_str("[window]\nsize = 0\n").is_err());
        assert!(PipelineConfig::from_toml_str("[failsafe]\nfallback_chain = []\n").is_err());
        assert!(PipelineConfig::from_toml_str("regulator_risk_threshold = 101\n").is_err());
        assert!(PipelineConfig::from_toml_str("window = 3").is_err());
    }
}
