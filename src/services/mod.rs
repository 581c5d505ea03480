//! Background Services Module
//!
//! Long-running maintenance tasks spawned by the telemetry context next to the
//! broadcast dispatchers and the alert worker.
//!
//! # Services
//!
//! - **HealthChecker**: periodic checks of the shared store breaker, the
//!   fail-safe state and broadcast queue saturation, rolled up into a
//!   `HealthReport` served on `/health`

pub mod health;

pub use health::{CheckResult, HealthChecker, HealthConfig, HealthReport, HealthStatus};
