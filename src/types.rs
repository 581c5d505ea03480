//! Core data types used throughout the pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a tenant (one customer organization)
pub type TenantId = String;

/// Token counters reported by the analysis provider, keyed by counter name
pub type TokenUsage = BTreeMap<String, u64>;

/// Highest valid risk score
pub const MAX_RISK_SCORE: u8 = 100;

/// Unique identifier for a telemetry sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleId(pub uuid::Uuid);

impl SampleId {
    /// Create a new random sample ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SampleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one completed content-risk analysis, as handed over by the
/// analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub tenant_id: TenantId,
    pub content_id: String,
    pub risk_score: u8,
    #[serde(default)]
    pub flags: Vec<String>,
    pub latency_ms: f64,
    #[serde(default)]
    pub token_usage: TokenUsage,
    pub provider: String,
    #[serde(default)]
    pub fail_safe_triggered: bool,
    #[serde(default)]
    pub fail_reason: Option<String>,
}

/// A single telemetry sample. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Sample identifier
    pub id: SampleId,
    /// Unix timestamp in milliseconds, assigned at ingest
    pub timestamp: i64,
    pub tenant_id: TenantId,
    pub content_id: String,
    /// Risk score in `0..=100`
    pub risk_score: u8,
    pub flags: Vec<String>,
    pub latency_ms: f64,
    pub token_usage: TokenUsage,
    pub provider: String,
    pub fail_safe_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
}

impl TelemetrySample {
    /// Build a sample from an analysis outcome, stamping it with `timestamp`.
    ///
    /// Scores above 100 are clamped.
    pub fn from_outcome(outcome: AnalysisOutcome, timestamp: i64) -> Self {
        Self {
            id: SampleId::new(),
            timestamp,
            tenant_id: outcome.tenant_id,
            content_id: outcome.content_id,
            risk_score: outcome.risk_score.min(MAX_RISK_SCORE),
            flags: outcome.flags,
            latency_ms: outcome.latency_ms,
            token_usage: outcome.token_usage,
            provider: outcome.provider,
            fail_safe_triggered: outcome.fail_safe_triggered,
            fail_reason: outcome.fail_reason,
        }
    }
}

/// Severity of fail-safe triggers and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Broadcast channel classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Every sample, unfiltered
    Public,
    /// Only the connection's own tenant
    Tenant,
    /// High-risk or fail-safe samples only
    Regulator,
}

impl Channel {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Public => "public",
            Channel::Tenant => "tenant",
            Channel::Regulator => "regulator",
        }
    }

    /// Whether connections on this channel are indexed by tenant
    pub fn is_tenant_scoped(&self) -> bool {
        matches!(self, Channel::Tenant)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of wall-clock time in unix milliseconds
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current unix time in milliseconds
    fn now_ms(&self) -> i64;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic time-dependent behaviour
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start_ms`
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    /// Move the clock forward
    pub fn advance_ms(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set_ms(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(tenant: &str, risk: u8) -> AnalysisOutcome {
        AnalysisOutcome {
            tenant_id: tenant.to_string(),
            content_id: "content-1".to_string(),
            risk_score: risk,
            flags: vec!["pii".to_string()],
            latency_ms: 120.0,
            token_usage: TokenUsage::new(),
            provider: "providerA".to_string(),
            fail_safe_triggered: false,
            fail_reason: None,
        }
    }

    #[test]
    fn test_sample_from_outcome_clamps_score() {
        let sample = TelemetrySample::from_outcome(outcome("acme", 250), 1_000);
        assert_eq!(sample.risk_score, 100);
        assert_eq!(sample.timestamp, 1_000);
        assert_eq!(sample.tenant_id, "acme");
    }

    #[test]
    fn test_sample_serialization_skips_empty_reason() {
        let sample = TelemetrySample::from_outcome(outcome("acme", 10), 5);
        let json = serde_json::to_value(&sample).unwrap();
        assert!(json.get("fail_reason").is_none());
        assert_eq!(json["risk_score"], 10);
    }

    #[test]
    fn test_outcome_defaults() {
        let outcome: AnalysisOutcome = serde_json::from_str(
            r#"{"tenant_id":"t","content_id":"c","risk_score":3,"latency_ms":1.5,"provider":"p"}"#,
        )
        .unwrap();
        assert!(outcome.flags.is_empty());
        assert!(!outcome.fail_safe_triggered);
        assert!(outcome.fail_reason.is_none());
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance_ms(50);
        assert_eq!(clock.now_ms(), 150);
        clock.set_ms(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_channel_labels() {
        assert_eq!(Channel::Regulator.to_string(), "regulator");
        assert!(Channel::Tenant.is_tenant_scoped());
        assert!(!Channel::Public.is_tenant_scoped());
    }
}
