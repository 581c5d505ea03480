//! Real-time telemetry broadcast, admission control and SLA fail-safe pipeline
//!
//! Every completed content-risk analysis is published once into the pipeline,
//! which records it in a bounded per-tenant window, re-evaluates the tenant's
//! service level, fans the sample out to role-scoped live viewers and drives a
//! degraded-mode controller that reroutes future work to a fallback provider.
//! A sliding-window rate limiter sits in front of every entry point.
//!
//! # Architecture
//!
//! ```text
//!              ┌─────────────┐
//!  request ───▶│ RateLimiter │───▶ entry points
//!              └─────────────┘
//!
//!  AnalysisOutcome ──▶ TelemetryIngestPoint ──┬──▶ SlidingMetricsWindow ──▶ SlaEvaluator
//!                                             ├──▶ ConnectionHub × 3 (public / tenant / regulator)
//!                                             ├──▶ AlertEvaluator ──▶ AlertSink
//!                                             └──▶ FailSafeController
//! ```
//!
//! All components are owned by a [`TelemetryContext`] created at startup.

pub mod alerts;
pub mod config;
pub mod context;
pub mod error;
pub mod failsafe;
pub mod hub;
pub mod ingest;
pub mod observability;
pub mod ratelimit;
pub mod services;
pub mod sla;
pub mod types;
pub mod window;

pub use config::PipelineConfig;
pub use context::{PipelineStatus, TelemetryContext};
pub use error::{Error, RateLimitExceeded, Result};
pub use failsafe::{FailSafeAlert, FailSafeController, FailSafeState};
pub use hub::{ConnectionHub, PushMessage};
pub use ingest::TelemetryIngestPoint;
pub use ratelimit::{RateLimitPolicy, RateLimiter};
pub use sla::{Compliance, Plan, PlanThresholds, SlaEvaluator, SlaSnapshot};
pub use types::{AnalysisOutcome, Channel, Severity, TelemetrySample, TenantId};
pub use window::SlidingMetricsWindow;
