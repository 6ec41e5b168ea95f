//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (read & deserialize, defaults when absent)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → handed to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is loaded once at startup; there is no hot reload
//! - All fields have defaults to allow minimal (or missing) configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::DEFAULT_USER_AGENT;
pub use schema::{
    CircuitBreakerConfig, LifecycleConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    PoolConfig, ReconnectConfig, RelayConfig, TransportConfig, UpstreamConfig,
};
pub use validation::ValidationError;
