//! Fail-safe controller
//!
//! Two-state machine (`Normal`, `Triggered`) that owns the active analysis
//! provider and a fixed fallback chain.
//!
//! ```text
//!            trigger()                trigger()
//!   Normal ───────────▶ Triggered ◀──────────┐
//!     ▲                   │  └───────────────┘
//!     └────── reset() ────┘
//! ```
//!
//! Every transition is applied under one write lock, so readers never see a
//! half-updated state. `switch_provider` changes the provider without a
//! transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::FailSafeConfig;
use crate::observability::TelemetryMetrics;
use crate::types::{Clock, Severity};

/// Controller mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailSafeMode {
    Normal,
    Triggered,
}

/// Process-wide fail-safe record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailSafeState {
    pub active: bool,
    pub triggered_at: Option<i64>,
    pub reason: Option<String>,
    pub severity: Option<Severity>,
    pub current_provider: String,
}

impl FailSafeState {
    pub fn mode(&self) -> FailSafeMode {
        if self.active {
            FailSafeMode::Triggered
        } else {
            FailSafeMode::Normal
        }
    }
}

/// Alert pushed to regulator viewers on every transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailSafeAlert {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub severity: Severity,
    pub previous_provider: String,
    pub current_provider: String,
    pub timestamp: i64,
}

/// Result of [`FailSafeController::trigger`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub active: bool,
    pub new_provider: String,
    pub timestamp: i64,
    #[serde(skip)]
    pub alert: Option<FailSafeAlert>,
}

/// Result of [`FailSafeController::reset`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetOutcome {
    pub active: bool,
    #[serde(skip)]
    pub alert: Option<FailSafeAlert>,
}

/// Result of [`FailSafeController::switch_provider`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSwitch {
    pub old: String,
    pub new: String,
}

/// Degraded-mode controller
pub struct FailSafeController {
    /// Ordered fallback chain, never empty
    chain: Vec<String>,

    state: RwLock<FailSafeState>,

    /// Lock-free flag read by status reporting
    active_flag: Arc<AtomicBool>,

    clock: Arc<dyn Clock>,
    metrics: Arc<TelemetryMetrics>,
}

impl std::fmt::Debug for FailSafeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailSafeController")
            .field("chain", &self.chain)
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl FailSafeController {
    /// Create a controller in `Normal` mode
    pub fn new(
        config: &FailSafeConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<TelemetryMetrics>,
    ) -> Self {
        let mut chain = config.fallback_chain.clone();
        if chain.is_empty() {
            chain = FailSafeConfig::default().fallback_chain;
        }
        let current_provider = config
            .initial_provider
            .clone()
            .unwrap_or_else(|| chain[0].clone());

        metrics.failsafe_active.set(0);
        Self {
            chain,
            state: RwLock::new(FailSafeState {
                active: false,
                triggered_at: None,
                reason: None,
                severity: None,
                current_provider,
            }),
            active_flag: Arc::new(AtomicBool::new(false)),
            clock,
            metrics,
        }
    }

    /// Enter (or stay in) `Triggered`, recording this call's reason and
    /// moving to `provider` or the next provider in the chain.
    pub fn trigger(&self, reason: &str, severity: Severity, provider: Option<&str>) -> TriggerOutcome {
        let timestamp = self.clock.now_ms();

        let alert = {
            let mut state = self.state.write();
            let previous = state.current_provider.clone();
            let next = match provider {
                Some(explicit) => explicit.to_string(),
                None => self.next_in_chain(&previous),
            };

            state.active = true;
            state.triggered_at = Some(timestamp);
            state.reason = Some(reason.to_string());
            state.severity = Some(severity);
            state.current_provider = next.clone();
            self.active_flag.store(true, Ordering::Release);
            self.metrics.failsafe_active.set(1);

            FailSafeAlert {
                active: true,
                reason: Some(reason.to_string()),
                severity,
                previous_provider: previous,
                current_provider: next,
                timestamp,
            }
        };

        self.metrics.failsafe_triggers.inc();
        tracing::warn!(
            reason = %reason,
            severity = %severity,
            previous_provider = %alert.previous_provider,
            new_provider = %alert.current_provider,
            "Fail-safe triggered"
        );

        TriggerOutcome {
            active: true,
            new_provider: alert.current_provider.clone(),
            timestamp,
            alert: Some(alert),
        }
    }

    /// Return to `Normal`. Keeps the current provider.
    pub fn reset(&self) -> ResetOutcome {
        let timestamp = self.clock.now_ms();

        let alert = {
            let mut state = self.state.write();
            let was_active = state.active;
            let severity = state.severity.unwrap_or(Severity::Info);
            state.active = false;
            state.triggered_at = None;
            state.reason = None;
            state.severity = None;
            self.active_flag.store(false, Ordering::Release);
            self.metrics.failsafe_active.set(0);

            was_active.then(|| FailSafeAlert {
                active: false,
                reason: None,
                severity,
                previous_provider: state.current_provider.clone(),
                current_provider: state.current_provider.clone(),
                timestamp,
            })
        };

        if alert.is_some() {
            tracing::info!("Fail-safe reset, normal operation resumed");
        }

        ResetOutcome {
            active: false,
            alert,
        }
    }

    /// Change the active provider without a state transition
    pub fn switch_provider(&self, name: &str) -> ProviderSwitch {
        let old = {
            let mut state = self.state.write();
            std::mem::replace(&mut state.current_provider, name.to_string())
        };
        tracing::info!(old = %old, new = %name, "Analysis provider switched");
        ProviderSwitch {
            old,
            new: name.to_string(),
        }
    }

    /// Consistent copy of the current state
    pub fn status(&self) -> FailSafeState {
        self.state.read().clone()
    }

    /// Provider future analysis work should be routed to
    pub fn current_provider(&self) -> String {
        self.state.read().current_provider.clone()
    }

    /// Whether degraded mode is active
    pub fn is_active(&self) -> bool {
        self.active_flag.load(Ordering::Acquire)
    }

    /// Shared handle to the active flag for status reporting
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active_flag.clone()
    }

    /// Fallback chain in order
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Provider after `current` in the chain, wrapping after the last.
    /// Providers outside the chain restart it from the head.
    fn next_in_chain(&self, current: &str) -> String {
        match self.chain.iter().position(|p| p == current) {
            Some(i) => self.chain[(i + 1) % self.chain.len()].clone(),
            None => self.chain[0].clone(),
        }
    }
}
