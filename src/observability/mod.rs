//! Observability layer for the telemetry pipeline
//!
//! # Components
//!
//! - **TelemetryMetrics**: Prometheus counters and gauges owned by the pipeline context
//! - **PrometheusExporter**: Text exposition for `/metrics`
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  ┌───────────────┐  ┌──────────────┐  ┌──────────────┐
//! │  RateLimiter  │  │ ConnectionHub │  │  FailSafe    │  │   Alerts     │
//! └───────┬───────┘  └───────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!         └──────────────────┴─────────┬───────┴─────────────────┘
//!                                      │
//!                            ┌─────────▼─────────┐
//!                            │ TelemetryMetrics  │──▶ PrometheusExporter ──▶ /metrics
//!                            │    (registry)     │
//!                            └───────────────────┘
//! ```

pub mod metrics;
pub mod prometheus_exporter;

pub use metrics::TelemetryMetrics;
pub use prometheus_exporter::{PrometheusConfig, PrometheusExporter};
