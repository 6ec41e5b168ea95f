//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// User agent sent upstream unless the caller supplies their own.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/78.0.3904.97 Safari/537.36";

/// Root configuration for the relay.
///
/// Besides the sections, a few flat top-level keys are accepted for short
/// config files: `host`, `port` and `listen` (ingress listener) and
/// `open_connections` (pool size). A flat key overrides the same key in its
/// section. Unknown keys anywhere are rejected.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(from = "RawRelayConfig")]
pub struct RelayConfig {
    /// Ingress listener configuration.
    pub listener: ListenerConfig,

    /// The single upstream host every request is relayed to.
    pub upstream: UpstreamConfig,

    /// Connection worker pool.
    pub pool: PoolConfig,

    /// QUIC transport tuning.
    pub transport: TransportConfig,

    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,

    /// Circuit breaker guarding reconnect attempts.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Startup/shutdown settings.
    pub lifecycle: LifecycleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// On-disk shape of `RelayConfig`, including the flat shorthand keys.
#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RawRelayConfig {
    host: Option<String>,
    port: Option<u16>,
    listen: Option<String>,
    open_connections: Option<usize>,

    listener: ListenerConfig,
    upstream: UpstreamConfig,
    pool: PoolConfig,
    transport: TransportConfig,
    reconnect: ReconnectConfig,
    circuit_breaker: CircuitBreakerConfig,
    lifecycle: LifecycleConfig,
    observability: ObservabilityConfig,
}

impl From<RawRelayConfig> for RelayConfig {
    fn from(raw: RawRelayConfig) -> Self {
        let mut listener = raw.listener;
        if let Some(host) = raw.host {
            listener.host = host;
        }
        if let Some(port) = raw.port {
            listener.port = port;
        }
        if raw.listen.is_some() {
            listener.listen = raw.listen;
        }

        let mut pool = raw.pool;
        if let Some(open_connections) = raw.open_connections {
            pool.open_connections = open_connections;
        }

        Self {
            listener,
            upstream: raw.upstream,
            pool,
            transport: raw.transport,
            reconnect: raw.reconnect,
            circuit_breaker: raw.circuit_breaker,
            lifecycle: raw.lifecycle,
            observability: raw.observability,
        }
    }
}

/// Ingress listener configuration.
///
/// Either `listen` ("addr:port") or the separate `host`/`port` pair may be
/// given; `listen` wins when both are present.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    pub listen: Option<String>,

    /// Maximum accepted ingress body size in bytes.
    pub max_body_bytes: usize,
}

impl ListenerConfig {
    /// The address the ingress server binds to.
    pub fn bind_address(&self) -> String {
        match &self.listen {
            Some(listen) => listen.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            listen: None,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Upstream host configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Host name to resolve and connect to.
    pub host: String,

    /// UDP port of the HTTP/3 endpoint.
    pub port: u16,

    /// TLS server name (SNI). Defaults to `host`.
    pub server_name: Option<String>,

    /// Default `user-agent` header.
    pub user_agent: String,
}

impl UpstreamConfig {
    /// Name presented during the TLS handshake.
    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.host)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "youtube.com".to_string(),
            port: 443,
            server_name: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Connection worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of connection workers, each owning one upstream connection.
    pub open_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { open_connections: 5 }
    }
}

/// QUIC transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Handshake timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Idle timeout after which a silent connection is considered dead.
    pub idle_timeout_secs: u64,

    /// Keep-alive ping interval in seconds.
    pub keep_alive_secs: u64,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            idle_timeout_secs: 30,
            keep_alive_secs: 10,
        }
    }
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive connect failures (across all workers) that open the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial is allowed.
    pub open_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_ms: 30_000,
        }
    }
}

/// Lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
    /// Time allowed for in-flight and queued requests to drain on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
