//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Logging/metrics → Transport → Multiplexer → Listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain queue (grace) → Fail leftovers → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: queued requests fail with 503 after the grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::StartupError;
