//! Circuit breaker around the shared rate-limit store
//!
//! Closed: every check goes to the shared store.
//! Open: checks go straight to the local path until the cool-down ends.
//! Half-open: one trial call decides whether to close or re-open. A trial
//! that never reports back (its caller was cancelled) expires after the trial
//! timeout and the next caller sends a fresh one.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::BreakerConfig;

/// Breaker state as exposed to health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerHealth {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { until_ms: i64 },
    HalfOpen { trial_started_ms: i64 },
}

/// Consecutive-failure breaker
#[derive(Debug)]
pub struct StoreBreaker {
    failure_threshold: u32,
    cool_down_ms: i64,
    trial_timeout_ms: i64,
    state: Mutex<State>,
}

impl StoreBreaker {
    /// `trial_timeout` bounds how long a half-open trial may stay unanswered
    pub fn new(config: &BreakerConfig, trial_timeout: Duration) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cool_down_ms: secs_to_ms(config.cool_down_secs),
            trial_timeout_ms: i64::try_from(trial_timeout.as_millis()).unwrap_or(i64::MAX),
            state: Mutex::new(State::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Whether the next check may use the shared store
    pub fn allow_request(&self, now_ms: i64) -> bool {
        let mut state = self.state.lock();
        match *state {
            State::Closed { .. } => true,
            State::Open { until_ms } if now_ms >= until_ms => {
                *state = State::HalfOpen {
                    trial_started_ms: now_ms,
                };
                tracing::info!("Shared rate-limit store breaker half-open, sending trial request");
                true
            }
            State::Open { .. } => false,
            State::HalfOpen { trial_started_ms }
                if now_ms >= trial_started_ms.saturating_add(self.trial_timeout_ms) =>
            {
                *state = State::HalfOpen {
                    trial_started_ms: now_ms,
                };
                tracing::debug!("Previous breaker trial went unanswered, sending a new one");
                true
            }
            State::HalfOpen { .. } => false,
        }
    }

    /// Record a successful store round trip
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if matches!(*state, State::HalfOpen { .. }) {
            tracing::info!("Shared rate-limit store recovered, breaker closed");
        }
        *state = State::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed store round trip
    pub fn record_failure(&self, now_ms: i64) {
        let mut state = self.state.lock();
        let next = match *state {
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    tracing::warn!(
                        failures,
                        cool_down_ms = self.cool_down_ms,
                        "Shared rate-limit store breaker opened"
                    );
                    State::Open {
                        until_ms: now_ms.saturating_add(self.cool_down_ms),
                    }
                } else {
                    State::Closed {
                        consecutive_failures: failures,
                    }
                }
            }
            State::HalfOpen { .. } => {
                tracing::warn!("Shared rate-limit store trial failed, breaker re-opened");
                State::Open {
                    until_ms: now_ms.saturating_add(self.cool_down_ms),
                }
            }
            open @ State::Open { .. } => open,
        };
        *state = next;
    }

    /// Current breaker state
    pub fn health(&self) -> BreakerHealth {
        match *self.state.lock() {
            State::Closed { .. } => BreakerHealth::Closed,
            State::Open { .. } => BreakerHealth::Open,
            State::HalfOpen { .. } => BreakerHealth::HalfOpen,
        }
    }
}

/// Seconds to milliseconds, saturating at `i64::MAX`
pub(crate) fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1_000)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> StoreBreaker {
        StoreBreaker::new(
            &BreakerConfig {
                failure_threshold: 2,
                cool_down_secs: 10,
            },
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let breaker = breaker();
        breaker.record_failure(0);
        assert_eq!(breaker.health(), BreakerHealth::Closed);
        breaker.record_failure(1);
        assert_eq!(breaker.health(), BreakerHealth::Open);
        assert!(!breaker.allow_request(5_000));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = breaker();
        breaker.record_failure(0);
        breaker.record_success();
        breaker.record_failure(1);
        assert_eq!(breaker.health(), BreakerHealth::Closed);
    }

    #[test]
    fn test_half_open_single_trial() {
        let breaker = breaker();
        breaker.record_failure(0);
        breaker.record_failure(0);

        assert!(breaker.allow_request(10_000));
        assert_eq!(breaker.health(), BreakerHealth::HalfOpen);
        // Second caller during the trial stays local.
        assert!(!breaker.allow_request(10_001));

        breaker.record_success();
        assert_eq!(breaker.health(), BreakerHealth::Closed);
        assert!(breaker.allow_request(10_002));
    }

    #[test]
    fn test_unanswered_trial_expires() {
        let breaker = breaker();
        breaker.record_failure(0);
        breaker.record_failure(0);

        // Trial sent, its caller never reports back.
        assert!(breaker.allow_request(10_000));
        assert!(!breaker.allow_request(10_499));

        assert!(breaker.allow_request(10_500));
        assert!(!breaker.allow_request(10_600));
        breaker.record_success();
        assert_eq!(breaker.health(), BreakerHealth::Closed);
    }

    #[test]
    fn test_huge_cool_down_saturates() {
        let breaker = StoreBreaker::new(
            &BreakerConfig {
                failure_threshold: 1,
                cool_down_secs: u64::MAX,
            },
            Duration::MAX,
        );
        breaker.record_failure(i64::MAX - 1);
        assert_eq!(breaker.health(), BreakerHealth::Open);
        assert!(!breaker.allow_request(i64::MAX - 1));
        assert_eq!(secs_to_ms(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_failed_trial_reopens() {
        let breaker = breaker();
        breaker.record_failure(0);
        breaker.record_failure(0);
        assert!(breaker.allow_request(10_000));
        breaker.record_failure(10_000);
        assert_eq!(breaker.health(), BreakerHealth::Open);
        assert!(!breaker.allow_request(15_000));
        assert!(breaker.allow_request(20_000));
    }
}
