//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Worker needs an upstream connection:
//!     → circuit_breaker.rs (may we attempt now?)
//!     → connect
//!     → On failure: record on breaker, sleep backoff.rs delay, try again
//!     → On success: reset backoff, close breaker
//! ```
//!
//! # Design Decisions
//! - Only connections are retried; requests are never replayed on error
//!   (a request paused by a dying connection is resumed, not retried)
//! - Jittered backoff prevents thundering herd across workers
//! - Circuit breaker bounds reconnect churn against a dead upstream

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::{calculate_backoff, Backoff};
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
