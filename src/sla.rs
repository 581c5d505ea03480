//! SLA evaluation
//!
//! Derives uptime, latency and error rate from a tenant's sliding window and
//! classifies the result against the tenant's plan thresholds.
//!
//! The two statistics use different ranges of the same window:
//!
//! ```text
//!   window (W samples, arrival order)
//!   ┌───────────────────────────────────────────────┐
//!   │ s0  s1  s2  ...                     s(W-1)    │  avg_latency, error_rate
//!   └───────────────────────────────────────────────┘
//!                          └── timestamp >= now-60s ─┘  uptime
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::TelemetrySample;

/// Subscription tier of a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Enterprise,
}

/// Service-level thresholds for a plan
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanThresholds {
    /// Minimum uptime percentage
    pub uptime_threshold: f64,

    /// Maximum average latency in milliseconds
    pub latency_threshold_ms: f64,
}

impl PlanThresholds {
    pub fn free() -> Self {
        Self {
            uptime_threshold: 97.0,
            latency_threshold_ms: 1500.0,
        }
    }

    pub fn pro() -> Self {
        Self {
            uptime_threshold: 99.5,
            latency_threshold_ms: 800.0,
        }
    }

    pub fn enterprise() -> Self {
        Self {
            uptime_threshold: 99.9,
            latency_threshold_ms: 500.0,
        }
    }

    /// Built-in thresholds for a plan
    pub fn for_plan(plan: Plan) -> Self {
        match plan {
            Plan::Free => Self::free(),
            Plan::Pro => Self::pro(),
            Plan::Enterprise => Self::enterprise(),
        }
    }
}

/// Fraction of the uptime threshold still counted as `partial`
pub const UPTIME_TOLERANCE: f64 = 0.9;

/// Multiple of the latency threshold below which latency counts as `partial`
pub const LATENCY_TOLERANCE: f64 = 1.2;

/// Compliance verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compliance {
    Compliant,
    Partial,
    Violation,
}

impl Compliance {
    /// Classify measured uptime and latency against plan thresholds.
    ///
    /// `partial` needs both metrics inside their tolerance bands: uptime at
    /// least 0.9x the threshold and latency strictly below 1.2x the threshold.
    /// One metric outside its band is a violation.
    pub fn classify(uptime: f64, avg_latency: f64, thresholds: &PlanThresholds) -> Self {
        let uptime_ok = uptime >= thresholds.uptime_threshold;
        let latency_ok = avg_latency <= thresholds.latency_threshold_ms;

        if uptime_ok && latency_ok {
            Compliance::Compliant
        } else if uptime >= UPTIME_TOLERANCE * thresholds.uptime_threshold
            && avg_latency < LATENCY_TOLERANCE * thresholds.latency_threshold_ms
        {
            Compliance::Partial
        } else {
            Compliance::Violation
        }
    }
}

/// Point-in-time SLA statistics for one tenant. Recomputed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlaSnapshot {
    /// Percentage of successful samples in the trailing uptime range
    pub uptime: f64,

    /// Mean latency over the whole window (milliseconds)
    pub avg_latency: f64,

    /// Percentage of fail-safe samples over the whole window
    pub error_rate: f64,

    /// Verdict against the plan thresholds
    pub compliance: Compliance,

    /// Samples in the window
    pub sample_count: usize,

    /// Samples inside the uptime range
    pub recent_count: usize,
}

/// Computes [`SlaSnapshot`]s from window contents
#[derive(Debug, Clone, Copy)]
pub struct SlaEvaluator {
    /// Trailing range considered for uptime
    uptime_range: Duration,
}

impl Default for SlaEvaluator {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl SlaEvaluator {
    /// Create an evaluator with the given uptime range
    pub fn new(uptime_range: Duration) -> Self {
        Self { uptime_range }
    }

    /// Evaluate a window snapshot at `now_ms`
    pub fn evaluate(
        &self,
        samples: &[TelemetrySample],
        thresholds: &PlanThresholds,
        now_ms: i64,
    ) -> SlaSnapshot {
        let cutoff = now_ms - self.uptime_range.as_millis() as i64;

        let (recent_count, recent_failures) = samples
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .fold((0usize, 0usize), |(count, failures), s| {
                (count + 1, failures + usize::from(s.fail_safe_triggered))
            });

        let uptime = if recent_count == 0 {
            100.0
        } else {
            (recent_count - recent_failures) as f64 / recent_count as f64 * 100.0
        };

        let (avg_latency, error_rate) = if samples.is_empty() {
            (0.0, 0.0)
        } else {
            let total = samples.len() as f64;
            let latency_sum: f64 = samples.iter().map(|s| s.latency_ms).sum();
            let failures = samples.iter().filter(|s| s.fail_safe_triggered).count();
            (latency_sum / total, failures as f64 / total * 100.0)
        };

        SlaSnapshot {
            uptime,
            avg_latency,
            error_rate,
            compliance: Compliance::classify(uptime, avg_latency, thresholds),
            sample_count: samples.len(),
            recent_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisOutcome, TokenUsage};

    const NOW: i64 = 1_700_000_000_000;

    fn sample(timestamp: i64, latency_ms: f64, failed: bool) -> TelemetrySample {
        TelemetrySample::from_outcome(
            AnalysisOutcome {
                tenant_id: "acme".to_string(),
                content_id: "c".to_string(),
                risk_score: 20,
                flags: vec![],
                latency_ms,
                token_usage: TokenUsage::new(),
                provider: "providerA".to_string(),
                fail_safe_triggered: failed,
                fail_reason: failed.then(|| "timeout".to_string()),
            },
            timestamp,
        )
    }

    #[test]
    fn test_empty_window_is_compliant() {
        let snapshot = SlaEvaluator::default().evaluate(&[], &PlanThresholds::free(), NOW);
        assert_eq!(snapshot.uptime, 100.0);
        assert_eq!(snapshot.avg_latency, 0.0);
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.compliance, Compliance::Compliant);
    }

    #[test]
    fn test_uptime_ignores_stale_samples() {
        // Two stale failures, two recent successes.
        let samples = vec![
            sample(NOW - 120_000, 1000.0, true),
            sample(NOW - 90_000, 1000.0, true),
            sample(NOW - 10_000, 200.0, false),
            sample(NOW - 1_000, 200.0, false),
        ];
        let snapshot = SlaEvaluator::default().evaluate(&samples, &PlanThresholds::free(), NOW);

        assert_eq!(snapshot.recent_count, 2);
        assert_eq!(snapshot.uptime, 100.0);
        // Latency and error rate still cover the whole window.
        assert_eq!(snapshot.avg_latency, 600.0);
        assert_eq!(snapshot.error_rate, 50.0);
    }

    #[test]
    fn test_no_recent_samples_defaults_uptime() {
        let samples = vec![sample(NOW - 61_000, 100.0, true)];
        let snapshot = SlaEvaluator::default().evaluate(&samples, &PlanThresholds::free(), NOW);
        assert_eq!(snapshot.uptime, 100.0);
        assert_eq!(snapshot.error_rate, 100.0);
    }

    #[test]
    fn test_recent_failures_reduce_uptime() {
        let samples = vec![
            sample(NOW - 5_000, 100.0, false),
            sample(NOW - 4_000, 100.0, false),
            sample(NOW - 3_000, 100.0, false),
            sample(NOW - 2_000, 100.0, true),
        ];
        let snapshot = SlaEvaluator::default().evaluate(&samples, &PlanThresholds::free(), NOW);
        assert_eq!(snapshot.uptime, 75.0);
        assert_eq!(snapshot.error_rate, 25.0);
    }

    #[test]
    fn test_classify_compliant() {
        let t = PlanThresholds::enterprise();
        assert_eq!(Compliance::classify(99.95, 450.0, &t), Compliance::Compliant);
        assert_eq!(Compliance::classify(99.9, 500.0, &t), Compliance::Compliant);
    }

    #[test]
    fn test_classify_enterprise_latency_breach_is_violation() {
        let t = PlanThresholds::enterprise();
        // 600ms sits on the 1.2x bound, which is outside the band.
        assert_eq!(Compliance::classify(99.95, 600.0, &t), Compliance::Violation);
    }

    #[test]
    fn test_classify_partial_needs_both_bands() {
        let t = PlanThresholds::enterprise();
        assert_eq!(Compliance::classify(99.95, 550.0, &t), Compliance::Partial);
        assert_eq!(Compliance::classify(95.0, 450.0, &t), Compliance::Partial);
        // Uptime inside its band does not rescue latency outside its band.
        assert_eq!(Compliance::classify(95.0, 900.0, &t), Compliance::Violation);
        assert_eq!(Compliance::classify(50.0, 450.0, &t), Compliance::Violation);
    }

    #[test]
    fn test_classify_violation() {
        let t = PlanThresholds::enterprise();
        assert_eq!(Compliance::classify(50.0, 900.0, &t), Compliance::Violation);
    }

    #[test]
    fn test_plan_defaults() {
        assert_eq!(PlanThresholds::for_plan(Plan::Free).uptime_threshold, 97.0);
        assert_eq!(PlanThresholds::for_plan(Plan::Pro).latency_threshold_ms, 800.0);
        assert_eq!(Plan::default(), Plan::Free);
    }
}
