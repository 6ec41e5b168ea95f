//! HTTP ingress subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, tracing, body limit)
//!     → request.rs (JSON body → RequestDescriptor)
//!     → Multiplexer::submit
//!     → response.rs (ResultRecord / RelayError → HTTP response)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{IngressRequest, X_REQUEST_ID};
pub use response::relay_response;
pub use server::{AppState, HttpServer};
