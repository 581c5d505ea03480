//! Threshold alerts
//!
//! [`AlertEvaluator`] runs a small declarative rule set against every fresh
//! SLA snapshot and every fail-safe trigger. SLA rules fire on the crossing:
//! a rule that keeps matching for a tenant stays quiet until it clears, or
//! until its severity changes. Fired rules produce [`AlertEvent`]s which the
//! [`AlertDispatcher`] hands to a background worker for delivery to external
//! sinks.
//!
//! Delivery is fire-and-forget. `dispatch` never waits: a full queue drops the
//! event and a failing sink is logged, neither reaches the ingest call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::config::AlertConfig;
use crate::error::SinkError;
use crate::failsafe::FailSafeAlert;
use crate::observability::TelemetryMetrics;
use crate::sla::{Compliance, PlanThresholds, SlaSnapshot};
use crate::types::{Severity, TenantId};

/// What an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    UptimeBelowThreshold,
    LatencyAboveThreshold,
    ErrorRateAboveThreshold,
    FailSafeTriggered,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::UptimeBelowThreshold => "uptime_below_threshold",
            AlertKind::LatencyAboveThreshold => "latency_above_threshold",
            AlertKind::ErrorRateAboveThreshold => "error_rate_above_threshold",
            AlertKind::FailSafeTriggered => "fail_safe_triggered",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule match, handed to sinks and not retained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub metric_value: f64,
    pub threshold: f64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

/// Declarative alert rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertRule {
    /// Uptime under the plan's uptime threshold
    UptimeBelowPlan,

    /// Average latency over the plan's latency threshold
    LatencyAbovePlan,

    /// Error rate over a fixed percentage
    ErrorRateAbove { threshold_pct: f64 },

    /// Any explicit fail-safe trigger
    FailSafeTriggered,
}

impl AlertRule {
    /// Kind raised by an SLA rule; `None` for non-SLA rules
    fn sla_kind(&self) -> Option<AlertKind> {
        match self {
            AlertRule::UptimeBelowPlan => Some(AlertKind::UptimeBelowThreshold),
            AlertRule::LatencyAbovePlan => Some(AlertKind::LatencyAboveThreshold),
            AlertRule::ErrorRateAbove { .. } => Some(AlertKind::ErrorRateAboveThreshold),
            AlertRule::FailSafeTriggered => None,
        }
    }

    /// Apply an SLA rule to a snapshot
    fn check_sla(
        &self,
        tenant_id: &str,
        snapshot: &SlaSnapshot,
        thresholds: &PlanThresholds,
        now_ms: i64,
    ) -> Option<AlertEvent> {
        // Severity follows the verdict: a violation is critical, anything milder a warning.
        let severity = if snapshot.compliance == Compliance::Violation {
            Severity::Critical
        } else {
            Severity::Warning
        };

        let (kind, metric_value, threshold, severity, message) = match *self {
            AlertRule::UptimeBelowPlan => {
                if snapshot.recent_count == 0 || snapshot.uptime >= thresholds.uptime_threshold {
                    return None;
                }
                (
                    AlertKind::UptimeBelowThreshold,
                    snapshot.uptime,
                    thresholds.uptime_threshold,
                    severity,
                    format!(
                        "Uptime for tenant {} is {:.2}%, below {:.2}%",
                        tenant_id, snapshot.uptime, thresholds.uptime_threshold
                    ),
                )
            }
            AlertRule::LatencyAbovePlan => {
                if snapshot.sample_count == 0
                    || snapshot.avg_latency <= thresholds.latency_threshold_ms
                {
                    return None;
                }
                (
                    AlertKind::LatencyAboveThreshold,
                    snapshot.avg_latency,
                    thresholds.latency_threshold_ms,
                    severity,
                    format!(
                        "Average latency for tenant {} is {:.1}ms, above {:.1}ms",
                        tenant_id, snapshot.avg_latency, thresholds.latency_threshold_ms
                    ),
                )
            }
            AlertRule::ErrorRateAbove { threshold_pct } => {
                if snapshot.error_rate <= threshold_pct {
                    return None;
                }
                (
                    AlertKind::ErrorRateAboveThreshold,
                    snapshot.error_rate,
                    threshold_pct,
                    Severity::High,
                    format!(
                        "Error rate for tenant {} is {:.2}%, above {:.2}%",
                        tenant_id, snapshot.error_rate, threshold_pct
                    ),
                )
            }
            AlertRule::FailSafeTriggered => return None,
        };

        Some(AlertEvent {
            kind,
            severity,
            message,
            metric_value,
            threshold,
            timestamp: now_ms,
            tenant_id: Some(tenant_id.to_string()),
        })
    }
}

/// Evaluates alert rules
#[derive(Debug)]
pub struct AlertEvaluator {
    rules: Vec<AlertRule>,

    /// SLA rules currently matching, with the severity last raised
    firing: Mutex<HashMap<(TenantId, AlertKind), Severity>>,
}

impl AlertEvaluator {
    /// Default rule set
    pub fn new(config: &AlertConfig) -> Self {
        Self::with_rules(vec![
            AlertRule::UptimeBelowPlan,
            AlertRule::LatencyAbovePlan,
            AlertRule::ErrorRateAbove {
                threshold_pct: config.error_rate_threshold_pct,
            },
            AlertRule::FailSafeTriggered,
        ])
    }

    pub fn with_rules(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            firing: Mutex::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Alerts raised by a freshly computed snapshot.
    ///
    /// Only rules that start matching, or whose severity changed since they
    /// last fired, produce an event. A rule that stops matching is re-armed.
    pub fn evaluate_sla(
        &self,
        tenant_id: &str,
        snapshot: &SlaSnapshot,
        thresholds: &PlanThresholds,
        now_ms: i64,
    ) -> Vec<AlertEvent> {
        let mut firing = self.firing.lock();
        let mut raised = Vec::new();

        for rule in &self.rules {
            let Some(kind) = rule.sla_kind() else {
                continue;
            };
            let key = (tenant_id.to_string(), kind);
            match rule.check_sla(tenant_id, snapshot, thresholds, now_ms) {
                Some(event) => {
                    if firing.insert(key, event.severity) != Some(event.severity) {
                        raised.push(event);
                    }
                }
                None => {
                    if firing.remove(&key).is_some() {
                        tracing::debug!(tenant_id = %tenant_id, alert = %kind, "Alert condition cleared");
                    }
                }
            }
        }

        raised
    }

    /// Number of (tenant, rule) pairs currently firing
    pub fn firing_count(&self) -> usize {
        self.firing.lock().len()
    }

    /// Alert raised by a fail-safe trigger, if the rule is enabled
    pub fn evaluate_failsafe(&self, alert: &FailSafeAlert) -> Option<AlertEvent> {
        if !alert.active || !self.rules.contains(&AlertRule::FailSafeTriggered) {
            return None;
        }
        Some(AlertEvent {
            kind: AlertKind::FailSafeTriggered,
            severity: alert.severity,
            message: format!(
                "Fail-safe triggered ({}): {} -> {}",
                alert.reason.as_deref().unwrap_or("unspecified"),
                alert.previous_provider,
                alert.current_provider
            ),
            metric_value: 1.0,
            threshold: 1.0,
            timestamp: alert.timestamp,
            tenant_id: None,
        })
    }
}

/// External destination for alert events
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Deliver one event
    async fn deliver(&self, event: &AlertEvent) -> Result<(), SinkError>;
}

/// Sink that writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), SinkError> {
        tracing::warn!(
            alert_type = %event.kind,
            severity = %event.severity,
            metric_value = event.metric_value,
            threshold = event.threshold,
            tenant_id = event.tenant_id.as_deref().unwrap_or("-"),
            "{}",
            event.message
        );
        Ok(())
    }
}

/// Sink that forwards alerts into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::Sender<AlertEvent>,
}

impl ChannelAlertSink {
    pub fn new(tx: mpsc::Sender<AlertEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AlertSink for ChannelAlertSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).await.map_err(|_| SinkError::Closed)
    }
}

/// Non-blocking handoff of alert events to the delivery worker
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<AlertEvent>,
    metrics: Arc<TelemetryMetrics>,
}

/// Background delivery worker paired with an [`AlertDispatcher`]
pub struct AlertWorker {
    rx: mpsc::Receiver<AlertEvent>,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    /// Create a dispatcher and the worker that drains it
    pub fn new(
        capacity: usize,
        sinks: Vec<Arc<dyn AlertSink>>,
        metrics: Arc<TelemetryMetrics>,
    ) -> (Self, AlertWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, metrics }, AlertWorker { rx, sinks })
    }

    /// Queue an event for delivery. Never waits.
    pub fn dispatch(&self, event: AlertEvent) {
        let kind = event.kind;
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics
                    .alerts_emitted
                    .with_label_values(&[kind.as_str()])
                    .inc();
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.alerts_dropped.inc();
                tracing::warn!(alert_type = %kind, "Alert queue full, dropping alert");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.alerts_dropped.inc();
                tracing::debug!(alert_type = %kind, "Alert worker stopped, dropping alert");
            }
        }
    }
}

impl AlertWorker {
    /// Deliver queued events until shutdown, then drain what is left
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(sinks = self.sinks.len(), "Alert worker started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Alert worker received shutdown signal");
                    break;
                }

                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.deliver(&event).await,
                        None => break,
                    }
                }
            }
        }

        self.rx.close();
        while let Ok(event) = self.rx.try_recv() {
            self.deliver(&event).await;
        }
        tracing::info!("Alert worker stopped");
    }

    async fn deliver(&self, event: &AlertEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(event).await {
                tracing::error!(
                    sink = sink.name(),
                    alert_type = %event.kind,
                    error = %e,
                    "Alert delivery failed"
                );
            }
        }
    }
}
