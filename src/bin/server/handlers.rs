//! HTTP Handlers for the riskpulse server
//!
//! REST endpoints for ingest, fail-safe control, SLA reads and operations.
//! Every handler passes its rate-limit policy before doing any work.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use riskpulse::ratelimit::client_identity;
use riskpulse::ratelimit::policy::PolicyKind;
use riskpulse::services::HealthStatus;
use riskpulse::{AnalysisOutcome, RateLimitExceeded, Severity, TelemetryContext};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::ServerConfig;

/// Header carrying the caller's role, set by the external auth layer
pub const ROLE_HEADER: &str = "x-user-role";

/// Roles allowed on privileged endpoints and the regulator channel
pub const PRIVILEGED_ROLES: [&str; 2] = ["regulator", "admin"];

// =============================================================================
// Application State
// =============================================================================

/// Shared application state
pub struct AppState {
    pub ctx: Arc<TelemetryContext>,
    pub config: ServerConfig,
}

// =============================================================================
// Errors
// =============================================================================

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Handler error mapped onto an HTTP response
#[derive(Debug)]
pub enum ApiError {
    RateLimited(RateLimitExceeded),
    Forbidden,
    BadRequest(String),
}

impl From<RateLimitExceeded> for ApiError {
    fn from(e: RateLimitExceeded) -> Self {
        ApiError::RateLimited(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::RateLimited(e) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(ErrorBody {
                        code: e.code,
                        message: e.message,
                    }),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(e.retry_after_secs));
                response
            }
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(ErrorBody {
                    code: "forbidden",
                    message: "Privileged role required".to_string(),
                }),
            )
                .into_response(),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    code: "bad_request",
                    message,
                }),
            )
                .into_response(),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Admit a request from this client under the configured `kind` policy
pub async fn admit(
    state: &AppState,
    headers: &HeaderMap,
    peer: SocketAddr,
    kind: PolicyKind,
) -> Result<(), ApiError> {
    let identity = client_identity(headers, Some(peer));
    let policy = state.ctx.config().rate_limit.policies.policy(kind);
    state
        .ctx
        .rate_limiter()
        .check_policy(&identity, &policy)
        .await
        .map_err(ApiError::from)
}

/// Whether the caller's role grants privileged access
pub fn is_privileged(headers: &HeaderMap) -> bool {
    headers
        .get(ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|role| PRIVILEGED_ROLES.contains(&role.trim()))
        .unwrap_or(false)
}

fn require_privileged(headers: &HeaderMap) -> Result<(), ApiError> {
    if is_privileged(headers) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: bool,
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub reason: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub provider: Option<String>,
}

fn default_severity() -> Severity {
    Severity::High
}

#[derive(Debug, Deserialize)]
pub struct ProviderRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct SlaResponse {
    pub tenant_id: String,
    pub plan: riskpulse::Plan,
    pub thresholds: riskpulse::PlanThresholds,
    pub metrics: riskpulse::SlaSnapshot,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub report: riskpulse::services::HealthReport,
}

// =============================================================================
// Ingest
// =============================================================================

/// Accept one completed analysis from the analysis pipeline
pub async fn ingest_telemetry(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(outcome): Json<AnalysisOutcome>,
) -> Result<impl IntoResponse, ApiError> {
    admit(&state, &headers, peer, PolicyKind::Ingest).await?;

    if outcome.tenant_id.trim().is_empty() {
        return Err(ApiError::BadRequest("tenant_id must not be empty".to_string()));
    }
    if !outcome.latency_ms.is_finite() || outcome.latency_ms < 0.0 {
        return Err(ApiError::BadRequest(
            "latency_ms must be a non-negative number".to_string(),
        ));
    }

    state.ctx.publish(outcome);
    Ok((StatusCode::ACCEPTED, Json(IngestResponse { accepted: true })))
}

// =============================================================================
// Fail-safe control
// =============================================================================

pub async fn trigger_failsafe(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<TriggerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    admit(&state, &headers, peer, PolicyKind::Proxy).await?;
    require_privileged(&headers)?;

    if req.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason must not be empty".to_string()));
    }

    let outcome = state
        .ctx
        .trigger_failsafe(&req.reason, req.severity, req.provider.as_deref());
    info!(reason = %req.reason, provider = %outcome.new_provider, "Fail-safe triggered via API");
    Ok(Json(outcome))
}

pub async fn reset_failsafe(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    admit(&state, &headers, peer, PolicyKind::Proxy).await?;
    require_privileged(&headers)?;

    Ok(Json(state.ctx.reset_failsafe()))
}

pub async fn switch_provider(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<ProviderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    admit(&state, &headers, peer, PolicyKind::Proxy).await?;
    require_privileged(&headers)?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }
    Ok(Json(state.ctx.switch_provider(name)))
}

pub async fn failsafe_status(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    admit(&state, &headers, peer, PolicyKind::Proxy).await?;
    require_privileged(&headers)?;

    Ok(Json(state.ctx.failsafe_status()))
}

// =============================================================================
// SLA & status
// =============================================================================

pub async fn tenant_sla(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    admit(&state, &headers, peer, PolicyKind::RegulatorFeed).await?;
    require_privileged(&headers)?;

    let plans = &state.ctx.config().plans;
    let plan = plans.plan_for(&tenant_id);
    Ok(Json(SlaResponse {
        plan,
        thresholds: plans.thresholds(plan),
        metrics: state.ctx.sla_snapshot(&tenant_id),
        tenant_id,
    }))
}

/// Pipeline status; exposes fail-safe details, so privileged
pub async fn telemetry_status(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    admit(&state, &headers, peer, PolicyKind::Proxy).await?;
    require_privileged(&headers)?;

    Ok(Json(state.ctx.status()))
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.ctx.health();
    let code = if report.status == HealthStatus::Unhealthy {
        warn!(failed = report.failed_checks().len(), "Health check reports unhealthy");
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        code,
        Json(HealthResponse {
            version: env!("CARGO_PKG_VERSION"),
            report,
        }),
    )
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (body, content_type) = state.ctx.export_metrics();
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body)
}
