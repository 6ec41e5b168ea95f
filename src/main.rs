//! QUIC/HTTP3 relay (v1)
//!
//! Accepts JSON-described HTTP requests on a local HTTP/1.1 listener and
//! relays them over a fixed pool of HTTP/3 connections to one upstream.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌───────────────────────────────────────────────────┐
//!                        │                    QUIC RELAY                      │
//!                        │                                                   │
//!   POST / {url, ...}    │  ┌─────────┐    ┌─────────────┐    ┌──────────┐   │
//!   ─────────────────────┼─▶│  http   │───▶│ Multiplexer │───▶│  queue   │   │
//!                        │  │ ingress │    │   submit    │    │ (paused  │   │
//!                        │  └─────────┘    └─────────────┘    │  first)  │   │
//!                        │       ▲                            └────┬─────┘   │
//!                        │       │                                 ▼         │
//!                        │       │      ┌──────────────────────────────────┐ │
//!                        │       │      │ workers × N (one connection each)│ │        Upstream
//!                        │       │      │  translator → transport (h3) ────┼─┼──────▶ (HTTP/3)
//!   Response             │       │      │  collector ◀── events ◀──────────┼─┼──────
//!   ◀────────────────────┼───────┴──────│  completion fires once           │ │
//!                        │              └──────────────────────────────────┘ │
//!                        │                                                   │
//!                        │  config · observability · resilience · lifecycle  │
//!                        └───────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use quic_relay::lifecycle::startup;

#[derive(Parser)]
#[command(name = "quic-relay")]
#[command(about = "Relay JSON-described HTTP requests over pooled HTTP/3 connections", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply if it is missing
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match startup::run(&cli.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be initialized yet.
            eprintln!("quic-relay: {e}");
            tracing::error!(error = %e, "Fatal startup error");
            ExitCode::FAILURE
        }
    }
}
