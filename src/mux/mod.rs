//! Request multiplexing subsystem.
//!
//! # Data Flow
//! ```text
//! Multiplexer::submit(RequestDescriptor)
//!     → queue.rs (fresh FIFO; paused FIFO served first)
//!     → worker.rs (one per upstream connection, one request in flight)
//!         → translator.rs (descriptor → ordered header list)
//!         → transport (open stream, send headers, send body)
//!         → collector.rs (route events by stream id until end of stream)
//!         → translator.rs (events → ResultRecord)
//!     → completion fires exactly once back to the submitter
//! ```
//!
//! # Design Decisions
//! - Each queued request carries its own single-fire completion, so a
//!   request paused by a dying connection still resolves its original caller
//! - Workers own their connection and collector; only the queues are shared
//! - Reconnects back off per worker and are gated by one shared circuit
//!   breaker, so an unreachable upstream does not cause a reconnect storm
//! - Requests whose connection dies are never failed, only paused

pub mod collector;
pub mod error;
pub mod manager;
pub mod queue;
pub mod translator;
pub mod types;
pub mod worker;

pub use collector::{StreamEventCollector, StreamOutcome};
pub use error::RelayError;
pub use manager::Multiplexer;
pub use queue::{Outcome, QueueEntry, WorkQueue};
pub use translator::{assemble_response, build_headers};
pub use types::{
    Method, RequestDescriptor, RequestId, RequestUrl, ResponseBody, ResultRecord, StreamEvent,
};
