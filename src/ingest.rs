//! Telemetry ingest point
//!
//! Single entry through which every completed analysis enters the pipeline.
//!
//! ```text
//!  AnalysisOutcome
//!        │
//!        ▼
//!   record in window ──▶ evaluate SLA ──▶ alerts (queued)
//!        │                    │
//!        │                    ├──▶ tenant: sla_metrics
//!        │                    └──▶ regulator: regulator_report on entering violation
//!        ▼
//!   public ◀── telemetry ──▶ tenant(id) ──▶ regulator (if visible)
//! ```
//!
//! `publish` is synchronous and never waits on delivery: every broadcast is a
//! queued job and every alert a non-blocking handoff.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::alerts::{AlertDispatcher, AlertEvaluator};
use crate::config::{PipelineConfig, PlanConfig};
use crate::failsafe::{FailSafeController, ResetOutcome, TriggerOutcome};
use crate::hub::{BroadcastChannel, PushMessage};
use crate::observability::TelemetryMetrics;
use crate::sla::{Compliance, SlaEvaluator, SlaSnapshot};
use crate::types::{AnalysisOutcome, Clock, Severity, TelemetrySample, TenantId};
use crate::window::SlidingMetricsWindow;

/// Whether a sample may be shown to regulator viewers.
///
/// Fail-safe samples are always visible; anything else only at or above
/// `risk_threshold`.
pub fn regulator_visible(sample: &TelemetrySample, risk_threshold: u8) -> bool {
    sample.fail_safe_triggered || sample.risk_score >= risk_threshold
}

/// Broadcast channels, one per hub
#[derive(Debug, Clone)]
pub struct Channels {
    pub public: BroadcastChannel,
    pub tenant: BroadcastChannel,
    pub regulator: BroadcastChannel,
}

/// Publishes analysis results into windows, hubs and alerts
pub struct TelemetryIngestPoint {
    window: Arc<SlidingMetricsWindow>,
    evaluator: SlaEvaluator,
    plans: PlanConfig,
    alerts: AlertEvaluator,
    alert_dispatcher: AlertDispatcher,
    failsafe: Arc<FailSafeController>,
    channels: Channels,
    metrics: Arc<TelemetryMetrics>,
    clock: Arc<dyn Clock>,
    regulator_risk_threshold: u8,
    auto_trigger_on_violation: bool,

    /// Last verdict per tenant, for detecting entry into violation
    verdicts: Mutex<HashMap<TenantId, Compliance>>,
}

impl std::fmt::Debug for TelemetryIngestPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryIngestPoint")
            .field("regulator_risk_threshold", &self.regulator_risk_threshold)
            .field("auto_trigger_on_violation", &self.auto_trigger_on_violation)
            .finish_non_exhaustive()
    }
}

impl TelemetryIngestPoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &PipelineConfig,
        window: Arc<SlidingMetricsWindow>,
        evaluator: SlaEvaluator,
        alert_dispatcher: AlertDispatcher,
        failsafe: Arc<FailSafeController>,
        channels: Channels,
        metrics: Arc<TelemetryMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            window,
            evaluator,
            plans: config.plans.clone(),
            alerts: AlertEvaluator::new(&config.alerts),
            alert_dispatcher,
            failsafe,
            channels,
            metrics,
            clock,
            regulator_risk_threshold: config.regulator_risk_threshold,
            auto_trigger_on_violation: config.failsafe.auto_trigger_on_violation,
            verdicts: Mutex::new(HashMap::new()),
        }
    }

    /// Ingest one completed analysis
    pub fn publish(&self, outcome: AnalysisOutcome) {
        let now = self.clock.now_ms();
        let sample = TelemetrySample::from_outcome(outcome, now);
        let tenant_id = sample.tenant_id.clone();

        let retained = self.window.record(sample.clone());
        self.metrics.samples_ingested.inc();
        tracing::trace!(
            tenant_id = %tenant_id,
            risk_score = sample.risk_score,
            retained,
            "Sample recorded"
        );

        let snapshot = self.evaluate(&tenant_id, now);

        let regulator = regulator_visible(&sample, self.regulator_risk_threshold);
        let telemetry = PushMessage::Telemetry {
            timestamp: now,
            data: sample,
        };
        self.channels.public.publish(&telemetry, None);
        self.channels.tenant.publish(&telemetry, Some(&tenant_id));
        if regulator {
            self.channels.regulator.publish(&telemetry, None);
        }

        self.channels.tenant.publish(
            &PushMessage::SlaMetrics {
                tenant_id: tenant_id.clone(),
                data: snapshot,
            },
            Some(&tenant_id),
        );

        if self.entered_violation(&tenant_id, snapshot.compliance) {
            tracing::warn!(
                tenant_id = %tenant_id,
                uptime = snapshot.uptime,
                avg_latency = snapshot.avg_latency,
                "Tenant entered SLA violation"
            );
            self.channels.regulator.publish(
                &PushMessage::RegulatorReport {
                    tenant_id: tenant_id.clone(),
                    data: snapshot,
                },
                None,
            );
            if self.auto_trigger_on_violation && !self.failsafe.is_active() {
                self.trigger_failsafe(
                    &format!("sla_violation:{tenant_id}"),
                    Severity::Critical,
                    None,
                );
            }
        }
    }

    /// Current SLA snapshot for a tenant under its plan
    pub fn sla_snapshot(&self, tenant_id: &str) -> SlaSnapshot {
        let plan = self.plans.plan_for(tenant_id);
        let samples = self.window.snapshot(tenant_id);
        self.evaluator
            .evaluate(&samples, &self.plans.thresholds(plan), self.clock.now_ms())
    }

    /// Trigger the fail-safe, notify regulator viewers and raise the alert
    pub fn trigger_failsafe(
        &self,
        reason: &str,
        severity: Severity,
        provider: Option<&str>,
    ) -> TriggerOutcome {
        let outcome = self.failsafe.trigger(reason, severity, provider);
        if let Some(alert) = &outcome.alert {
            if let Some(event) = self.alerts.evaluate_failsafe(alert) {
                self.alert_dispatcher.dispatch(event);
            }
            self.channels.regulator.publish(
                &PushMessage::FailsafeAlert {
                    alert: alert.clone(),
                },
                None,
            );
        }
        outcome
    }

    /// Reset the fail-safe and notify regulator viewers if it was active
    pub fn reset_failsafe(&self) -> ResetOutcome {
        let outcome = self.failsafe.reset();
        if let Some(alert) = &outcome.alert {
            self.channels.regulator.publish(
                &PushMessage::FailsafeAlert {
                    alert: alert.clone(),
                },
                None,
            );
        }
        outcome
    }

    pub fn regulator_risk_threshold(&self) -> u8 {
        self.regulator_risk_threshold
    }

    fn evaluate(&self, tenant_id: &str, now: i64) -> SlaSnapshot {
        let thresholds = self.plans.thresholds(self.plans.plan_for(tenant_id));
        let samples = self.window.snapshot(tenant_id);
        let snapshot = self.evaluator.evaluate(&samples, &thresholds, now);

        for event in self.alerts.evaluate_sla(tenant_id, &snapshot, &thresholds, now) {
            self.alert_dispatcher.dispatch(event);
        }
        snapshot
    }

    /// Record the verdict and report whether it just moved into violation
    fn entered_violation(&self, tenant_id: &str, compliance: Compliance) -> bool {
        let mut verdicts = self.verdicts.lock();
        let previous = verdicts.insert(tenant_id.to_string(), compliance);
        compliance == Compliance::Violation && previous != Some(Compliance::Violation)
    }
}
