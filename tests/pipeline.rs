//! End-to-end visibility and admission behaviour through a running context

use std::sync::Arc;
use std::time::Duration;

use riskpulse::hub::{ChannelConnection, Frame};
use riskpulse::ratelimit::policy;
use riskpulse::types::{ManualClock, TokenUsage};
use riskpulse::{AnalysisOutcome, Channel, PipelineConfig, TelemetryContext};
use tokio::sync::mpsc::Receiver;

const START_MS: i64 = 1_700_000_000_000;

fn outcome(tenant: &str, risk_score: u8, fail_safe_triggered: bool) -> AnalysisOutcome {
    AnalysisOutcome {
        tenant_id: tenant.to_string(),
        content_id: format!("{tenant}-content"),
        risk_score,
        flags: vec![],
        latency_ms: 150.0,
        token_usage: TokenUsage::new(),
        provider: "providerA".to_string(),
        fail_safe_triggered,
        fail_reason: None,
    }
}

fn start() -> (Arc<TelemetryContext>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START_MS));
    let ctx = TelemetryContext::start_with_clock(PipelineConfig::default(), vec![], None, clock.clone())
        .unwrap();
    (ctx, clock)
}

async fn attach(
    ctx: &TelemetryContext,
    channel: Channel,
    tenant: Option<&str>,
) -> Receiver<Frame> {
    let (conn, mut rx) = ChannelConnection::pair(64, Duration::from_millis(200));
    ctx.connect(channel, Arc::new(conn), tenant.map(str::to_string))
        .await
        .unwrap();
    if channel == Channel::Tenant {
        // Initial SLA snapshot
        let first = rx.recv().await.unwrap();
        assert!(first.contains("\"sla_metrics\""));
    }
    rx
}

/// Telemetry pushes received within a short quiet period
async fn telemetry_for(rx: &mut Receiver<Frame>) -> Vec<serde_json::Value> {
    let mut pushes = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        if json["type"] == "telemetry" {
            pushes.push(json);
        }
    }
    pushes
}

#[tokio::test]
async fn high_risk_sample_reaches_regulator_and_own_tenant_only() {
    let (ctx, _) = start();
    let mut regulator = attach(&ctx, Channel::Regulator, None).await;
    let mut tenant_a = attach(&ctx, Channel::Tenant, Some("tenant-a")).await;
    let mut tenant_b = attach(&ctx, Channel::Tenant, Some("tenant-b")).await;

    ctx.publish(outcome("tenant-a", 85, false));

    let seen = telemetry_for(&mut regulator).await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["data"]["risk_score"], 85);

    let seen = telemetry_for(&mut tenant_a).await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["data"]["tenant_id"], "tenant-a");

    assert!(telemetry_for(&mut tenant_b).await.is_empty());

    ctx.shutdown().await;
}

#[tokio::test]
async fn low_risk_sample_skips_regulator() {
    let (ctx, _) = start();
    let mut regulator = attach(&ctx, Channel::Regulator, None).await;
    let mut public = attach(&ctx, Channel::Public, None).await;
    let mut tenant = attach(&ctx, Channel::Tenant, Some("tenant-a")).await;

    ctx.publish(outcome("tenant-a", 40, false));

    assert_eq!(telemetry_for(&mut public).await.len(), 1);
    assert_eq!(telemetry_for(&mut tenant).await.len(), 1);
    assert!(telemetry_for(&mut regulator).await.is_empty());

    ctx.shutdown().await;
}

#[tokio::test]
async fn fail_safe_sample_reaches_regulator_regardless_of_score() {
    let (ctx, _) = start();
    let mut regulator = attach(&ctx, Channel::Regulator, None).await;

    ctx.publish(outcome("tenant-a", 5, true));

    let seen = telemetry_for(&mut regulator).await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["data"]["fail_safe_triggered"], true);

    ctx.shutdown().await;
}

#[tokio::test]
async fn per_connection_order_follows_ingest_order() {
    let (ctx, _) = start();
    let mut public = attach(&ctx, Channel::Public, None).await;

    for score in [10, 20, 30, 40, 50] {
        ctx.publish(outcome("tenant-a", score, false));
    }

    let scores: Vec<_> = telemetry_for(&mut public)
        .await
        .iter()
        .map(|p| p["data"]["risk_score"].as_u64().unwrap())
        .collect();
    assert_eq!(scores, vec![10, 20, 30, 40, 50]);

    ctx.shutdown().await;
}

#[tokio::test]
async fn closed_viewer_is_dropped_without_affecting_others() {
    let (ctx, _) = start();
    let closed = attach(&ctx, Channel::Public, None).await;
    let mut open = attach(&ctx, Channel::Public, None).await;
    drop(closed);

    ctx.publish(outcome("tenant-a", 10, false));

    assert_eq!(telemetry_for(&mut open).await.len(), 1);
    assert_eq!(ctx.hub(Channel::Public).len(), 1);

    ctx.shutdown().await;
}

#[tokio::test]
async fn handshake_policy_rejects_then_recovers_after_window() {
    let (ctx, clock) = start();
    let limiter = ctx.rate_limiter();
    let p = policy::CONNECTION_HANDSHAKE;

    for _ in 0..p.limit {
        limiter.check_policy("10.0.0.1", &p).await.unwrap();
    }
    let err = limiter.check_policy("10.0.0.1", &p).await.unwrap_err();
    assert_eq!(err.code, "rate_limit");

    // Other identities are unaffected
    limiter.check_policy("10.0.0.2", &p).await.unwrap();

    clock.advance_ms((p.window_secs * 1_000) as i64 + 1);
    limiter.check_policy("10.0.0.1", &p).await.unwrap();

    ctx.shutdown().await;
}
