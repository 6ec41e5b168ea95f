//! QUIC/HTTP3 relay library.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod mux;
pub mod observability;
pub mod resilience;
pub mod transport;

pub use config::RelayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use mux::{Multiplexer, RelayError, RequestDescriptor, ResultRecord};
