//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool size > 0, timeouts > 0, ports parse)
//! - Check that backoff bounds are ordered
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::RelayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("upstream.host must not be empty")]
    EmptyUpstreamHost,

    #[error("reconnect.base_delay_ms ({base}) exceeds reconnect.max_delay_ms ({max})")]
    BackoffBounds { base: u64, max: u64 },

    #[error("observability.log_level is not a valid filter: {0}")]
    LogLevel(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let bind = config.listener.bind_address();
    if bind.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener",
            value: bind,
        });
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_body_bytes" });
    }

    if config.upstream.host.trim().is_empty() {
        errors.push(ValidationError::EmptyUpstreamHost);
    }
    if config.upstream.port == 0 {
        errors.push(ValidationError::Zero { field: "upstream.port" });
    }

    if config.pool.open_connections == 0 {
        errors.push(ValidationError::Zero { field: "pool.open_connections" });
    }

    if config.transport.connect_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "transport.connect_timeout_secs" });
    }
    if config.transport.idle_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "transport.idle_timeout_secs" });
    }

    if config.reconnect.base_delay_ms == 0 {
        errors.push(ValidationError::Zero { field: "reconnect.base_delay_ms" });
    }
    if config.reconnect.base_delay_ms > config.reconnect.max_delay_ms {
        errors.push(ValidationError::BackoffBounds {
            base: config.reconnect.base_delay_ms,
            max: config.reconnect.max_delay_ms,
        });
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::Zero { field: "circuit_breaker.failure_threshold" });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }
    if tracing_subscriber::EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
