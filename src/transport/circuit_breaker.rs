//! Per-worker circuit breaker.
//!
//! # State Transitions
//! ```text
//! Closed -> Open:      consecutive failed batches >= failure_threshold
//! Open -> HalfOpen:    recovery_timeout elapsed since opening
//! HalfOpen -> Closed:  the trial batch is delivered
//! HalfOpen -> Open:    the trial batch fails (timer restarts)
//! ```
//!
//! Each worker owns its breaker exclusively, so there is never more than one trial batch in
//! flight per breaker. Failures count whole batches, not individual attempts.

use crate::config::CircuitBreakerConfig;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// What the worker may do with the next batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal delivery with the full retry policy.
    Proceed,
    /// Recovery trial: exactly one attempt decides the next state.
    Trial,
    /// Circuit open: drop without calling the endpoint.
    Reject,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout,
        }
    }

    /// New thresholds apply from the next decision; current state is kept.
    pub fn reconfigure(&mut self, config: &CircuitBreakerConfig) {
        self.failure_threshold = config.failure_threshold.max(1);
        self.recovery_timeout = config.recovery_timeout;
    }

    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Proceed,
            CircuitState::HalfOpen => Admission::Trial,
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                if now.saturating_duration_since(opened_at) >= self.recovery_timeout {
                    info!("Circuit recovery timeout elapsed, probing endpoint");
                    self.state = CircuitState::HalfOpen;
                    Admission::Trial
                } else {
                    Admission::Reject
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!(previous = %self.state, "Circuit closed after successful delivery");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let trip = match self.state {
            CircuitState::Closed => self.consecutive_failures >= self.failure_threshold,
            CircuitState::HalfOpen | CircuitState::Open => true,
        };

        if trip {
            if self.state != CircuitState::Open {
                warn!(
                    consecutive_failures = self.consecutive_failures,
                    recovery_timeout = ?self.recovery_timeout,
                    "Circuit opened"
                );
            }
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
