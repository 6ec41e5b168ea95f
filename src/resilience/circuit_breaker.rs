//! Circuit breaker guarding upstream reconnects.
//!
//! # States
//! - Closed: normal operation, connect attempts pass through
//! - Open: upstream assumed down, attempts are held back
//! - Half-Open: a single trial attempt is allowed
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: after open duration elapses
//! Half-Open → Closed: trial connect succeeds
//! Half-Open → Open: trial connect fails
//! ```
//!
//! # Design Decisions
//! - One breaker shared by every worker (there is only one upstream)
//! - Rejected callers are told how long to wait instead of failing requests
//! - Single trial in Half-Open (prevents hammering a recovering upstream)

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used for the state gauge.
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

/// Outcome of asking the breaker for permission to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after: Duration },
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    open_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            failure_threshold: config.failure_threshold.max(1),
            open_duration: Duration::from_millis(config.open_ms),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Ask whether a connect attempt may proceed now.
    pub fn try_acquire(&self) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    metrics::record_circuit_state(CircuitState::HalfOpen);
                    tracing::info!("Circuit half-open, allowing trial connect");
                    Admission::Allowed
                } else {
                    Admission::Rejected {
                        retry_after: self.open_duration - elapsed,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    // Another worker is probing; check back shortly.
                    Admission::Rejected {
                        retry_after: self.open_duration.min(Duration::from_millis(100)),
                    }
                } else {
                    inner.trial_in_flight = true;
                    Admission::Allowed
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            metrics::record_circuit_state(CircuitState::Closed);
            tracing::info!("Circuit closed, upstream reachable again");
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            metrics::record_circuit_state(CircuitState::Open);
            tracing::warn!(
                failures = inner.consecutive_failures,
                open_ms = self.open_duration.as_millis() as u64,
                "Circuit opened, pausing reconnect attempts"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave Inner half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
