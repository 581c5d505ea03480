//! Pipeline metrics registry

use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

/// Default prefix for every metric name
pub const DEFAULT_METRIC_PREFIX: &str = "riskpulse";

/// Counters and gauges updated inline by pipeline components
#[derive(Clone)]
pub struct TelemetryMetrics {
    registry: Registry,

    /// Samples accepted by the ingest point
    pub samples_ingested: IntCounter,

    /// Requests rejected by the rate limiter, by key prefix
    pub rate_limit_rejections: IntCounterVec,

    /// Rate-limit decisions taken on the local path
    pub rate_limit_local_decisions: IntCounter,

    /// Rate-limit decisions answered by the shared store
    pub rate_limit_shared_decisions: IntCounter,

    /// Shared-store errors and timeouts
    pub shared_store_errors: IntCounter,

    /// Broadcast jobs discarded by the drop-oldest policy, by channel
    pub broadcast_jobs_dropped: IntCounterVec,

    /// Frames delivered, by channel
    pub deliveries: IntCounterVec,

    /// Per-connection delivery failures, by channel
    pub delivery_failures: IntCounterVec,

    /// Registered connections, by channel
    pub connections: IntGaugeVec,

    /// Alerts handed to the sink worker, by alert type
    pub alerts_emitted: IntCounterVec,

    /// Alerts discarded because the sink queue was full
    pub alerts_dropped: IntCounter,

    /// 1 while the fail-safe controller is triggered
    pub failsafe_active: IntGauge,

    /// Fail-safe trigger calls
    pub failsafe_triggers: IntCounter,
}

impl std::fmt::Debug for TelemetryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryMetrics")
            .field("samples_ingested", &self.samples_ingested.get())
            .field("failsafe_active", &self.failsafe_active.get())
            .finish_non_exhaustive()
    }
}

impl TelemetryMetrics {
    /// Create metrics under the default prefix
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_prefix(DEFAULT_METRIC_PREFIX)
    }

    /// Create metrics with every name prefixed by `prefix`
    pub fn with_prefix(prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let name = |suffix: &str| format!("{prefix}_{suffix}");

        let samples_ingested =
            IntCounter::new(name("samples_ingested_total"), "Telemetry samples ingested")?;
        let rate_limit_rejections = IntCounterVec::new(
            Opts::new(name("rate_limit_rejections_total"), "Requests rejected by rate limiting"),
            &["policy"],
        )?;
        let rate_limit_local_decisions = IntCounter::new(
            name("rate_limit_local_decisions_total"),
            "Rate-limit decisions taken by the local fallback",
        )?;
        let rate_limit_shared_decisions = IntCounter::new(
            name("rate_limit_shared_decisions_total"),
            "Rate-limit decisions answered by the shared store",
        )?;
        let shared_store_errors = IntCounter::new(
            name("shared_store_errors_total"),
            "Shared rate-limit store errors and timeouts",
        )?;
        let broadcast_jobs_dropped = IntCounterVec::new(
            Opts::new(
                name("broadcast_jobs_dropped_total"),
                "Broadcast jobs discarded by the drop-oldest policy",
            ),
            &["channel"],
        )?;
        let deliveries = IntCounterVec::new(
            Opts::new(name("deliveries_total"), "Frames delivered to live connections"),
            &["channel"],
        )?;
        let delivery_failures = IntCounterVec::new(
            Opts::new(
                name("delivery_failures_total"),
                "Deliveries that failed and dropped the connection",
            ),
            &["channel"],
        )?;
        let connections = IntGaugeVec::new(
            Opts::new(name("connections"), "Registered live connections"),
            &["channel"],
        )?;
        let alerts_emitted = IntCounterVec::new(
            Opts::new(name("alerts_emitted_total"), "Alerts handed to the sink"),
            &["type"],
        )?;
        let alerts_dropped = IntCounter::new(
            name("alerts_dropped_total"),
            "Alerts discarded because the sink queue was full",
        )?;
        let failsafe_active =
            IntGauge::new(name("failsafe_active"), "1 while degraded mode is active")?;
        let failsafe_triggers =
            IntCounter::new(name("failsafe_triggers_total"), "Fail-safe trigger calls")?;

        registry.register(Box::new(samples_ingested.clone()))?;
        registry.register(Box::new(rate_limit_rejections.clone()))?;
        registry.register(Box::new(rate_limit_local_decisions.clone()))?;
        registry.register(Box::new(rate_limit_shared_decisions.clone()))?;
        registry.register(Box::new(shared_store_errors.clone()))?;
        registry.register(Box::new(broadcast_jobs_dropped.clone()))?;
        registry.register(Box::new(deliveries.clone()))?;
        registry.register(Box::new(delivery_failures.clone()))?;
        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(alerts_emitted.clone()))?;
        registry.register(Box::new(alerts_dropped.clone()))?;
        registry.register(Box::new(failsafe_active.clone()))?;
        registry.register(Box::new(failsafe_triggers.clone()))?;

        Ok(Self {
            registry,
            samples_ingested,
            rate_limit_rejections,
            rate_limit_local_decisions,
            rate_limit_shared_decisions,
            shared_store_errors,
            broadcast_jobs_dropped,
            deliveries,
            delivery_failures,
            connections,
            alerts_emitted,
            alerts_dropped,
            failsafe_active,
            failsafe_triggers,
        })
    }

    /// Registry holding every pipeline metric
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register() {
        let metrics = TelemetryMetrics::new().unwrap();
        metrics.samples_ingested.inc();
        metrics.connections.with_label_values(&["public"]).set(3);

        let families = metrics.registry().gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"riskpulse_samples_ingested_total".to_string()));
        assert!(names.contains(&"riskpulse_connections".to_string()));
    }

    #[test]
    fn test_independent_registries() {
        // Two contexts in one process must not collide.
        let a = TelemetryMetrics::new().unwrap();
        let b = TelemetryMetrics::new().unwrap();
        a.samples_ingested.inc();
        assert_eq!(a.samples_ingested.get(), 1);
        assert_eq!(b.samples_ingested.get(), 0);
    }
}
