//! Telemetry context
//!
//! Owns every pipeline component for the lifetime of the process. Built once
//! at startup by [`TelemetryContext::start`], shared with handlers as an
//! `Arc`, and torn down with [`TelemetryContext::shutdown`].
//!
//! # Workers
//!
//! ```text
//!   start() ──┬── dispatcher(public)     ─┐
//!             ├── dispatcher(tenant)      │
//!             ├── dispatcher(regulator)   ├── shutdown channel
//!             ├── alert worker            │
//!             ├── health checker          │
//!             └── local bucket sweeper   ─┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::alerts::{AlertDispatcher, AlertSink};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::failsafe::{FailSafeController, FailSafeState, ProviderSwitch, ResetOutcome, TriggerOutcome};
use crate::hub::{BroadcastChannel, Connection, ConnectionHub, ConnectionId, PushMessage};
use crate::ingest::{Channels, TelemetryIngestPoint};
use crate::observability::{PrometheusConfig, PrometheusExporter, TelemetryMetrics};
use crate::ratelimit::{BreakerHealth, RateLimiter, SharedRateLimitStore};
use crate::services::{HealthChecker, HealthConfig, HealthReport};
use crate::sla::{SlaEvaluator, SlaSnapshot};
use crate::types::{AnalysisOutcome, Channel, Clock, Severity, SystemClock, TenantId};
use crate::window::SlidingMetricsWindow;

/// How often idle local rate-limit buckets are swept
const LOCAL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Live connections per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionCounts {
    pub public: usize,
    pub tenant: usize,
    pub regulator: usize,
}

/// Pending broadcast jobs per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub public: usize,
    pub tenant: usize,
    pub regulator: usize,
}

/// Pipeline status served to operators
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub failsafe: FailSafeState,
    pub connections: ConnectionCounts,
    pub queued_broadcasts: QueueDepths,
    /// `None` when no shared rate-limit store is configured
    pub shared_store: Option<BreakerHealth>,
    pub tenants_tracked: usize,
}

/// Process-wide pipeline context
pub struct TelemetryContext {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<TelemetryMetrics>,
    exporter: PrometheusExporter,
    rate_limiter: Arc<RateLimiter>,
    window: Arc<SlidingMetricsWindow>,
    failsafe: Arc<FailSafeController>,
    channels: Channels,
    ingest: TelemetryIngestPoint,
    health: Arc<HealthChecker>,

    shutdown_tx: broadcast::Sender<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TelemetryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryContext")
            .field("rate_limiter", &self.rate_limiter)
            .field("failsafe", &self.failsafe)
            .field("workers", &self.workers.lock().len())
            .finish_non_exhaustive()
    }
}

impl TelemetryContext {
    /// Build every component and spawn the background workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: PipelineConfig,
        alert_sinks: Vec<Arc<dyn AlertSink>>,
        shared_store: Option<Arc<dyn SharedRateLimitStore>>,
    ) -> Result<Arc<Self>> {
        Self::start_with_clock(config, alert_sinks, shared_store, Arc::new(SystemClock))
    }

    /// [`start`](Self::start) with an explicit clock
    pub fn start_with_clock(
        config: PipelineConfig,
        alert_sinks: Vec<Arc<dyn AlertSink>>,
        shared_store: Option<Arc<dyn SharedRateLimitStore>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let metrics = Arc::new(TelemetryMetrics::new()?);
        let exporter = PrometheusExporter::new(PrometheusConfig::default(), metrics.clone());

        let store_name = shared_store.as_ref().map(|s| s.name());
        let rate_limiter = Arc::new(RateLimiter::new(
            &config.rate_limit,
            shared_store,
            clock.clone(),
            metrics.clone(),
        ));

        let window = Arc::new(SlidingMetricsWindow::new(config.window.size));
        let evaluator = SlaEvaluator::new(Duration::from_secs(config.window.uptime_range_secs));
        let failsafe = Arc::new(FailSafeController::new(
            &config.failsafe,
            clock.clone(),
            metrics.clone(),
        ));

        let channel = |c: Channel| {
            BroadcastChannel::new(
                Arc::new(ConnectionHub::new(c, metrics.clone())),
                config.broadcast.queue_capacity,
                metrics.clone(),
            )
        };
        let channels = Channels {
            public: channel(Channel::Public),
            tenant: channel(Channel::Tenant),
            regulator: channel(Channel::Regulator),
        };

        let (alert_dispatcher, alert_worker) =
            AlertDispatcher::new(config.alerts.queue_capacity, alert_sinks, metrics.clone());

        let ingest = TelemetryIngestPoint::new(
            &config,
            window.clone(),
            evaluator,
            alert_dispatcher,
            failsafe.clone(),
            channels.clone(),
            metrics.clone(),
            clock.clone(),
        );

        let health = Arc::new(HealthChecker::new(
            HealthConfig::default(),
            rate_limiter.clone(),
            failsafe.clone(),
            vec![
                (Channel::Public, channels.public.queue().clone()),
                (Channel::Tenant, channels.tenant.queue().clone()),
                (Channel::Regulator, channels.regulator.queue().clone()),
            ],
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut workers = Vec::new();

        for broadcast_channel in [&channels.public, &channels.tenant, &channels.regulator] {
            let c = broadcast_channel.clone();
            let rx = shutdown_tx.subscribe();
            workers.push(tokio::spawn(async move { c.run(rx).await }));
        }

        workers.push(tokio::spawn(alert_worker.run(shutdown_tx.subscribe())));

        let h = health.clone();
        let rx = shutdown_tx.subscribe();
        workers.push(tokio::spawn(async move { h.run(rx).await }));

        let limiter = rate_limiter.clone();
        let rx = shutdown_tx.subscribe();
        workers.push(tokio::spawn(sweep_local_buckets(limiter, rx)));

        tracing::info!(
            window_size = config.window.size,
            queue_capacity = config.broadcast.queue_capacity,
            shared_store = store_name.unwrap_or("none"),
            provider = %failsafe.current_provider(),
            "Telemetry context started"
        );

        Ok(Arc::new(Self {
            config,
            clock,
            metrics,
            exporter,
            rate_limiter,
            window,
            failsafe,
            channels,
            ingest,
            health,
            shutdown_tx,
            workers: Mutex::new(workers),
        }))
    }

    /// Stop every worker and wait for them to finish
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down telemetry context");
        let _ = self.shutdown_tx.send(());

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Pipeline worker panicked during shutdown");
            }
        }
        tracing::info!("Telemetry context stopped");
    }

    // ------------------------------------------------------------------------
    // Ingest and fail-safe
    // ------------------------------------------------------------------------

    /// Ingest one completed analysis. Never waits on delivery.
    pub fn publish(&self, outcome: AnalysisOutcome) {
        self.ingest.publish(outcome);
    }

    pub fn trigger_failsafe(
        &self,
        reason: &str,
        severity: Severity,
        provider: Option<&str>,
    ) -> TriggerOutcome {
        self.ingest.trigger_failsafe(reason, severity, provider)
    }

    pub fn reset_failsafe(&self) -> ResetOutcome {
        self.ingest.reset_failsafe()
    }

    pub fn switch_provider(&self, name: &str) -> ProviderSwitch {
        self.failsafe.switch_provider(name)
    }

    pub fn failsafe_status(&self) -> FailSafeState {
        self.failsafe.status()
    }

    /// Current SLA snapshot for a tenant
    pub fn sla_snapshot(&self, tenant_id: &str) -> SlaSnapshot {
        self.ingest.sla_snapshot(tenant_id)
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    /// Register a live connection on a channel.
    ///
    /// Tenant connections receive the tenant's current SLA snapshot before
    /// they are registered, so it is always their first frame.
    pub async fn connect(
        &self,
        channel: Channel,
        connection: Arc<dyn Connection>,
        tenant_id: Option<TenantId>,
    ) -> Result<ConnectionId> {
        if channel == Channel::Tenant {
            if let Some(tenant) = &tenant_id {
                let initial = PushMessage::SlaMetrics {
                    tenant_id: tenant.clone(),
                    data: self.sla_snapshot(tenant),
                };
                connection.send(initial.to_frame()?).await?;
            }
        }

        let id = self.hub(channel).connect(connection, tenant_id)?;
        Ok(id)
    }

    /// Unregister a connection; idempotent
    pub fn disconnect(&self, channel: Channel, id: ConnectionId) -> bool {
        self.hub(channel).disconnect(id)
    }

    pub fn hub(&self, channel: Channel) -> &Arc<ConnectionHub> {
        self.broadcast_channel(channel).hub()
    }

    pub fn broadcast_channel(&self, channel: Channel) -> &BroadcastChannel {
        match channel {
            Channel::Public => &self.channels.public,
            Channel::Tenant => &self.channels.tenant,
            Channel::Regulator => &self.channels.regulator,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors and reporting
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn window(&self) -> &SlidingMetricsWindow {
        &self.window
    }

    pub fn failsafe(&self) -> &FailSafeController {
        &self.failsafe
    }

    pub fn metrics(&self) -> &TelemetryMetrics {
        &self.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Prometheus text exposition
    pub fn export_metrics(&self) -> (String, &'static str) {
        self.exporter.export_http()
    }

    /// Run the health checks now
    pub fn health(&self) -> HealthReport {
        self.health.run_health_checks()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            failsafe: self.failsafe.status(),
            connections: ConnectionCounts {
                public: self.channels.public.hub().len(),
                tenant: self.channels.tenant.hub().len(),
                regulator: self.channels.regulator.hub().len(),
            },
            queued_broadcasts: QueueDepths {
                public: self.channels.public.queue().len(),
                tenant: self.channels.tenant.queue().len(),
                regulator: self.channels.regulator.queue().len(),
            },
            shared_store: self.rate_limiter.store_health(),
            tenants_tracked: self.window.tenants().len(),
        }
    }
}

/// Periodically drop idle local rate-limit buckets
async fn sweep_local_buckets(limiter: Arc<RateLimiter>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(LOCAL_SWEEP_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            result = shutdown.recv() => {
                match result {
                    Ok(()) | Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }

            _ = ticker.tick() => {
                let removed = limiter.sweep_local();
                if removed > 0 {
                    tracing::debug!(removed, "Swept idle local rate-limit buckets");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hub::ChannelConnection;
    use crate::types::{ManualClock, TokenUsage};

    fn outcome(tenant: &str, risk_score: u8) -> AnalysisOutcome {
        AnalysisOutcome {
            tenant_id: tenant.to_string(),
            content_id: "c1".to_string(),
            risk_score,
            flags: vec!["pii".to_string()],
            latency_ms: 120.0,
            token_usage: TokenUsage::new(),
            provider: "providerA".to_string(),
            fail_safe_triggered: false,
            fail_reason: None,
        }
    }

    fn start() -> Arc<TelemetryContext> {
        TelemetryContext::start_with_clock(
            PipelineConfig::default(),
            vec![],
            None,
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
        .unwrap()
    }

    async fn next(rx: &mut tokio::sync::mpsc::Receiver<crate::hub::Frame>) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_tenant_connect_gets_sla_first() {
        let ctx = start();
        let (conn, mut rx) = ChannelConnection::pair(16, Duration::from_millis(100));
        ctx.connect(Channel::Tenant, Arc::new(conn), Some("acme".into()))
            .await
            .unwrap();

        let first = next(&mut rx).await;
        assert_eq!(first["type"], "sla_metrics");
        assert_eq!(first["data"]["uptime"], 100.0);

        ctx.publish(outcome("acme", 30));
        assert_eq!(next(&mut rx).await["type"], "telemetry");
        assert_eq!(next(&mut rx).await["type"], "sla_metrics");

        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_tenant_connect_requires_tenant() {
        let ctx = start();
        let (conn, _rx) = ChannelConnection::pair(16, Duration::from_millis(100));
        let err = ctx.connect(Channel::Tenant, Arc::new(conn), None).await;
        assert!(matches!(err, Err(Error::Scope(_))));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_failsafe_alert_reaches_regulator() {
        let ctx = start();
        let (conn, mut rx) = ChannelConnection::pair(16, Duration::from_millis(100));
        ctx.connect(Channel::Regulator, Arc::new(conn), None)
            .await
            .unwrap();

        let outcome = ctx.trigger_failsafe("provider outage", Severity::High, None);
        assert_eq!(outcome.new_provider, "providerB");

        let push = next(&mut rx).await;
        assert_eq!(push["type"], "failsafe_alert");
        assert_eq!(push["alert"]["reason"], "provider outage");
        assert_eq!(push["alert"]["current_provider"], "providerB");

        let switch = ctx.switch_provider("providerC");
        assert_eq!(switch.old, "providerB");
        assert!(ctx.failsafe_status().active);

        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_and_health() {
        let ctx = start();
        let (conn, _rx) = ChannelConnection::pair(16, Duration::from_millis(100));
        ctx.connect(Channel::Public, Arc::new(conn), None).await.unwrap();
        ctx.publish(outcome("acme", 30));

        let status = ctx.status();
        assert_eq!(status.connections.public, 1);
        assert_eq!(status.tenants_tracked, 1);
        assert!(status.shared_store.is_none());
        assert!(!status.failsafe.active);

        assert!(ctx.health().status.is_healthy());
        let (text, content_type) = ctx.export_metrics();
        assert!(text.contains("riskpulse_samples_ingested_total 1"));
        assert!(content_type.starts_with("text/plain"));

        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.window.size = 0;
        let result = TelemetryContext::start(config, vec![], None);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
