//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging and the optional metrics exporter
//! - Start the multiplexer, then bind the ingress listener
//! - Run until a shutdown signal, then stop in order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{load_config, ConfigError, RelayConfig};
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::mux::Multiplexer;
use crate::observability::{logging, metrics};
use crate::transport::{QuicTransport, Transport, TransportError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Run the relay with the configuration at `config_path` until signalled.
pub async fn run(config_path: &Path) -> Result<(), StartupError> {
    let config = load_config(config_path)?;
    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        listen = %config.listener.bind_address(),
        upstream = %format!("{}:{}", config.upstream.host, config.upstream.port),
        pool_size = config.pool.open_connections,
        "quic-relay starting"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    let transport = QuicTransport::new(&config.upstream, &config.transport)?;
    serve(config, transport, signals::wait_for_shutdown()).await
}

/// Start the multiplexer over `transport`, serve ingress, and stop once
/// `stop` resolves.
pub async fn serve<T, F>(config: RelayConfig, transport: T, stop: F) -> Result<(), StartupError>
where
    T: Transport,
    F: std::future::Future<Output = ()>,
{
    let mux = Multiplexer::start(&config, transport);

    let address = config.listener.bind_address();
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(source) => {
            mux.shutdown(Duration::ZERO).await;
            return Err(StartupError::Bind { address, source });
        }
    };

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config, Arc::clone(&mux));
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let early_exit = tokio::select! {
        _ = stop => None,
        result = &mut server_task => Some(result),
    };

    shutdown.trigger();
    // Draining the multiplexer resolves every in-flight handler, which lets
    // the server's graceful shutdown finish.
    mux.shutdown(Duration::from_secs(config.lifecycle.shutdown_grace_secs))
        .await;

    let result = match early_exit {
        Some(result) => result,
        None => server_task.await,
    };
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(StartupError::Serve(e)),
        Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
