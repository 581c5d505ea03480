//! riskpulse HTTP Server
//!
//! Serves the telemetry pipeline: live viewer WebSockets, the ingest endpoint
//! used by the analysis pipeline, fail-safe control and operational endpoints.
//!
//! # Endpoints
//!
//! ## Live viewers
//! - `GET /ws/public` - Every ingested sample
//! - `GET /ws/tenant/:tenant_id` - One tenant's samples and SLA updates
//! - `GET /ws/regulator` - High-risk samples, fail-safe alerts, compliance reports
//!
//! ## Ingest
//! - `POST /api/v1/telemetry` - Publish a completed analysis
//!
//! ## Fail-safe (privileged)
//! - `GET /api/v1/failsafe` - Current state
//! - `POST /api/v1/failsafe/trigger` - Enter degraded mode
//! - `POST /api/v1/failsafe/reset` - Return to normal
//! - `POST /api/v1/failsafe/provider` - Switch the active provider
//!
//! ## Reads & admin
//! - `GET /api/v1/sla/:tenant_id` - Tenant SLA snapshot
//! - `GET /api/v1/telemetry/status` - Pipeline status
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `RISKPULSE_CONFIG` environment variable (path to TOML file)
//! 2. `./riskpulse.toml` in current directory
//! 3. Default configuration
//!
//! # Example
//!
//! ```bash
//! RISKPULSE_CONFIG=/etc/riskpulse.toml ./server
//!
//! curl -X POST http://localhost:8080/api/v1/telemetry \
//!   -H "Content-Type: application/json" \
//!   -d '{"tenant_id": "acme", "content_id": "c1", "risk_score": 85,
//!        "latency_ms": 420.0, "provider": "providerA"}'
//! ```

#[path = "server/config.rs"]
mod config;
#[path = "server/handlers.rs"]
mod handlers;
#[path = "server/ws.rs"]
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use riskpulse::alerts::{AlertSink, TracingAlertSink};
use riskpulse::error::StoreError;
use riskpulse::ratelimit::{RedisWindowStore, SharedRateLimitStore};
use riskpulse::TelemetryContext;
use tokio::signal;
use tracing::{info, warn};

use config::{load_config, ServerConfig};
use handlers::AppState;

/// Open the shared rate-limit store, if one is configured.
///
/// An unreachable store is not fatal: the limiter keeps retrying it and runs
/// on the local path meanwhile, with the breaker reporting the outage.
async fn init_shared_store(
    config: &ServerConfig,
) -> Result<Option<Arc<dyn SharedRateLimitStore>>, StoreError> {
    let Some(url) = config.pipeline.rate_limit.redis_url.as_deref() else {
        info!("No shared rate-limit store configured, rate limiting locally only");
        return Ok(None);
    };

    let store = RedisWindowStore::open(url)?;
    match tokio::time::timeout(config.pipeline.rate_limit.io_timeout(), store.ensure_connected())
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(error = %e, "Shared rate-limit store unavailable, will retry on demand");
        }
        Err(_) => {
            warn!("Shared rate-limit store did not answer in time, will retry on demand");
        }
    }
    Ok(Some(Arc::new(store) as Arc<dyn SharedRateLimitStore>))
}

/// Build the router with all endpoints
fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Live viewers
        .route("/ws/public", get(ws::public_ws))
        .route("/ws/tenant/:tenant_id", get(ws::tenant_ws))
        .route("/ws/regulator", get(ws::regulator_ws))
        // API v1
        .route("/api/v1/telemetry", post(handlers::ingest_telemetry))
        .route("/api/v1/telemetry/status", get(handlers::telemetry_status))
        .route("/api/v1/failsafe", get(handlers::failsafe_status))
        .route("/api/v1/failsafe/trigger", post(handlers::trigger_failsafe))
        .route("/api/v1/failsafe/reset", post(handlers::reset_failsafe))
        .route("/api/v1/failsafe/provider", post(handlers::switch_provider))
        .route("/api/v1/sla/:tenant_id", get(handlers::tenant_sla))
        .with_state(state)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("riskpulse=info".parse()?)
                .add_directive("server=info".parse()?),
        )
        .init();

    info!("riskpulse server starting, version {}", env!("CARGO_PKG_VERSION"));

    let config = load_config();
    info!("Listen address: {}", config.listen_addr);

    let shared_store = init_shared_store(&config).await?;
    let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(TracingAlertSink)];
    let ctx = TelemetryContext::start(config.pipeline.clone(), sinks, shared_store)?;

    let state = Arc::new(AppState {
        ctx: ctx.clone(),
        config: config.clone(),
    });
    let app = build_router(state);

    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    ctx.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}
