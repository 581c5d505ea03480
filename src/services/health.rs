//! Health Check Service
//!
//! Performs periodic health checks on the telemetry pipeline:
//! - Shared rate-limit store (breaker state)
//! - Fail-safe controller (degraded mode active or not)
//! - Broadcast queues (saturation)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};

use crate::failsafe::FailSafeController;
use crate::hub::BroadcastQueue;
use crate::ratelimit::{BreakerHealth, RateLimiter};
use crate::types::Channel;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the health check service
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between health checks
    pub check_interval: Duration,

    /// Queue fill ratio at or above which a broadcast queue counts as saturated
    pub queue_saturation_ratio: f64,

    /// Number of consecutive failures before a check is reported failing
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            queue_saturation_ratio: 0.8,
            failure_threshold: 3,
        }
    }
}

// ============================================================================
// Health Status
// ============================================================================

/// Overall health status of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Everything nominal
    Healthy,

    /// Operational with reduced guarantees
    Degraded,

    /// Most checks failing
    Unhealthy,

    /// Checks haven't run yet
    Unknown,
}

impl HealthStatus {
    /// Check if the status indicates the pipeline is operational
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if the status indicates the pipeline is fully healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

// ============================================================================
// Individual Check Results
// ============================================================================

/// Result of a single health check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,

    /// Whether the check passed
    pub passed: bool,

    /// Optional message with details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Duration of the check
    #[serde(skip)]
    pub duration: Duration,
}

impl CheckResult {
    /// Create a passing check result
    pub fn pass(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
            duration,
        }
    }

    /// Create a passing check result with a note
    pub fn pass_with(name: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::pass(name, duration)
        }
    }

    /// Create a failing check result
    pub fn fail(name: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
            duration,
        }
    }
}

// ============================================================================
// Health Report
// ============================================================================

/// Complete health report with all check results
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall health status
    pub status: HealthStatus,

    /// Individual check results
    pub checks: Vec<CheckResult>,

    /// When the report was generated
    #[serde(skip)]
    pub generated_at: Instant,
}

impl Default for HealthReport {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            checks: Vec::new(),
            generated_at: Instant::now(),
        }
    }
}

impl HealthReport {
    /// Create a new health report from check results
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let failed_count = checks.iter().filter(|c| !c.passed).count();

        // 0 failures: Healthy; fewer than half: Degraded; otherwise Unhealthy
        let status = if failed_count == 0 {
            HealthStatus::Healthy
        } else if failed_count * 2 < checks.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        Self {
            status,
            checks,
            generated_at: Instant::now(),
        }
    }

    /// Get all failed checks
    pub fn failed_checks(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    /// Get all passed checks
    pub fn passed_checks(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| c.passed).collect()
    }
}

// ============================================================================
// Health Checker Service
// ============================================================================

/// Periodic pipeline health checks
pub struct HealthChecker {
    config: HealthConfig,

    rate_limiter: Arc<RateLimiter>,
    failsafe: Arc<FailSafeController>,
    queues: Vec<(Channel, Arc<BroadcastQueue>)>,

    /// Latest health report
    report: RwLock<HealthReport>,

    /// Consecutive failure counts per check
    failure_counts: RwLock<HashMap<String, u32>>,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("config", &self.config)
            .field("status", &self.health_status())
            .finish_non_exhaustive()
    }
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new(
        config: HealthConfig,
        rate_limiter: Arc<RateLimiter>,
        failsafe: Arc<FailSafeController>,
        queues: Vec<(Channel, Arc<BroadcastQueue>)>,
    ) -> Self {
        Self {
            config,
            rate_limiter,
            failsafe,
            queues,
            report: RwLock::new(HealthReport::default()),
            failure_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Get the latest health report
    pub fn report(&self) -> HealthReport {
        self.report.read().clone()
    }

    /// Get the current health status
    pub fn health_status(&self) -> HealthStatus {
        self.report.read().status
    }

    /// Check if the pipeline is healthy
    pub fn is_healthy(&self) -> bool {
        self.report.read().status.is_healthy()
    }

    /// Run all health checks and update the report
    pub fn run_health_checks(&self) -> HealthReport {
        let start = Instant::now();

        let mut checks = vec![self.check_shared_store(), self.check_failsafe()];
        checks.extend(
            self.queues
                .iter()
                .map(|(channel, queue)| self.check_queue(*channel, queue)),
        );

        self.update_check_counters(&checks);

        let report = HealthReport::from_checks(checks);
        *self.report.write() = report.clone();

        tracing::debug!(
            status = ?report.status,
            duration_us = start.elapsed().as_micros() as u64,
            "Health check completed"
        );

        report
    }

    /// Shared rate-limit store breaker
    fn check_shared_store(&self) -> CheckResult {
        let start = Instant::now();

        match self.rate_limiter.store_health() {
            None => CheckResult::pass_with("shared_store", "not configured, local only", start.elapsed()),
            Some(BreakerHealth::Closed) => CheckResult::pass("shared_store", start.elapsed()),
            Some(BreakerHealth::HalfOpen) => CheckResult::fail(
                "shared_store",
                "breaker half-open, probing shared store",
                start.elapsed(),
            ),
            Some(BreakerHealth::Open) => CheckResult::fail(
                "shared_store",
                "breaker open, rate limiting on local fallback",
                start.elapsed(),
            ),
        }
    }

    /// Fail-safe controller state
    fn check_failsafe(&self) -> CheckResult {
        let start = Instant::now();
        let state = self.failsafe.status();

        if state.active {
            CheckResult::fail(
                "failsafe",
                format!(
                    "degraded mode active ({}), provider {}",
                    state.reason.as_deref().unwrap_or("unspecified"),
                    state.current_provider
                ),
                start.elapsed(),
            )
        } else {
            CheckResult::pass("failsafe", start.elapsed())
        }
    }

    /// Broadcast queue saturation
    fn check_queue(&self, channel: Channel, queue: &BroadcastQueue) -> CheckResult {
        let start = Instant::now();
        let name = format!("broadcast_queue:{channel}");
        let ratio = queue.len() as f64 / queue.capacity() as f64;

        if ratio >= self.config.queue_saturation_ratio {
            CheckResult::fail(
                name,
                format!("{}/{} jobs pending", queue.len(), queue.capacity()),
                start.elapsed(),
            )
        } else {
            CheckResult::pass(name, start.elapsed())
        }
    }

    /// Update consecutive failure counts
    fn update_check_counters(&self, checks: &[CheckResult]) {
        let mut failures = self.failure_counts.write();
        for check in checks {
            if check.passed {
                failures.remove(&check.name);
            } else {
                *failures.entry(check.name.clone()).or_insert(0) += 1;
            }
        }
    }

    /// Get consecutive failure count for a check
    pub fn failure_count(&self, check_name: &str) -> u32 {
        self.failure_counts
            .read()
            .get(check_name)
            .copied()
            .unwrap_or(0)
    }

    /// Check if a specific check has exceeded the failure threshold
    pub fn is_check_failing(&self, check_name: &str) -> bool {
        self.failure_count(check_name) >= self.config.failure_threshold
    }

    /// Periodic check loop
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.config.check_interval.as_secs(),
            "Health checker started"
        );

        let mut check_interval = interval(self.config.check_interval);

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Health checker received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(missed = n, "Health checker broadcast receiver lagged");
                        }
                    }
                }

                _ = check_interval.tick() => {
                    let report = self.run_health_checks();
                    if !report.status.is_healthy() {
                        tracing::warn!(
                            status = ?report.status,
                            failed = report.failed_checks().len(),
                            "Pipeline health degraded"
                        );
                    }
                    for check in report.failed_checks() {
                        if self.is_check_failing(&check.name) {
                            tracing::warn!(
                                check = %check.name,
                                consecutive = self.failure_count(&check.name),
                                message = check.message.as_deref().unwrap_or(""),
                                "Health check failing repeatedly"
                            );
                        }
                    }
                }
            }
        }

        tracing::info!("Health checker stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailSafeConfig, RateLimitConfig};
    use crate::hub::BroadcastJob;
    use crate::observability::TelemetryMetrics;
    use crate::types::{ManualClock, Severity};

    fn checker(queue: Arc<BroadcastQueue>) -> (HealthChecker, Arc<FailSafeController>) {
        let metrics = Arc::new(TelemetryMetrics::new().unwrap());
        let clock = Arc::new(ManualClock::new(0));
        let limiter = Arc::new(RateLimiter::new(
            &RateLimitConfig::default(),
            None,
            clock.clone(),
            metrics.clone(),
        ));
        let failsafe = Arc::new(FailSafeController::new(
            &FailSafeConfig::default(),
            clock,
            metrics,
        ));
        let checker = HealthChecker::new(
            HealthConfig::default(),
            limiter,
            failsafe.clone(),
            vec![(Channel::Public, queue)],
        );
        (checker, failsafe)
    }

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Degraded.is_operational());
        assert!(!HealthStatus::Degraded.is_healthy());
        assert!(!HealthStatus::Unhealthy.is_operational());
        assert!(!HealthStatus::Unknown.is_operational());
    }

    #[test]
    fn test_health_report_from_checks() {
        let report = HealthReport::from_checks(vec![
            CheckResult::pass("check1", Duration::ZERO),
            CheckResult::pass("check2", Duration::ZERO),
            CheckResult::fail("check3", "failed", Duration::ZERO),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.failed_checks().len(), 1);
        assert_eq!(report.passed_checks().len(), 2);

        let report = HealthReport::from_checks(vec![
            CheckResult::fail("check1", "failed", Duration::ZERO),
            CheckResult::pass("check2", Duration::ZERO),
        ]);
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_nominal_pipeline_is_healthy() {
        let (checker, _) = checker(Arc::new(BroadcastQueue::new(10)));
        assert_eq!(checker.health_status(), HealthStatus::Unknown);

        let report = checker.run_health_checks();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(
            report.checks[0].message.as_deref(),
            Some("not configured, local only")
        );
        assert!(checker.is_healthy());
    }

    #[test]
    fn test_active_failsafe_degrades() {
        let (checker, failsafe) = checker(Arc::new(BroadcastQueue::new(10)));
        failsafe.trigger("provider outage", Severity::High, None);

        let report = checker.run_health_checks();
        assert_eq!(report.status, HealthStatus::Degraded);
        let failed = report.failed_checks();
        assert_eq!(failed[0].name, "failsafe");
        assert!(failed[0].message.as_deref().unwrap().contains("providerB"));
    }

    #[test]
    fn test_saturated_queue_fails_and_counts() {
        let queue = Arc::new(BroadcastQueue::new(2));
        for _ in 0..2 {
            queue.push(BroadcastJob {
                frame: "x".into(),
                tenant_id: None,
            });
        }
        let (checker, _) = checker(queue);

        for _ in 0..3 {
            checker.run_health_checks();
        }
        assert_eq!(checker.failure_count("broadcast_queue:public"), 3);
        assert!(checker.is_check_failing("broadcast_queue:public"));
        assert!(!checker.is_check_failing("failsafe"));
    }

    #[tokio::test]
    async fn test_health_checker_lifecycle() {
        let (checker, _) = checker(Arc::new(BroadcastQueue::new(10)));
        let checker = Arc::new(checker);
        let (tx, rx) = broadcast::channel(1);

        let c = checker.clone();
        let handle = tokio::spawn(async move { c.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        // First tick fires immediately
        assert_eq!(checker.health_status(), HealthStatus::Healthy);
    }
}
