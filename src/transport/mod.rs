//! Upstream transport subsystem.
//!
//! # Data Flow
//! ```text
//! Worker
//!     → Transport::connect (one connection per worker)
//!     → TransportConnection::open_stream / send_headers / send_data
//!     → TransportEvent stream (headers, data, pushes, resets, termination)
//!     → back to the worker's stream event collector
//! ```
//!
//! # Design Decisions
//! - QUIC and HTTP/3 framing stay behind the `Transport` trait; the
//!   multiplexer only sees stream ids and `TransportEvent`s
//! - Events are delivered over an unbounded channel so the transport never
//!   blocks on a busy worker
//! - Stream ids are allocated by the connection and never reused

pub mod event;
pub mod quic;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

pub use event::{HeaderField, PushId, StreamId, TransportEvent};
pub use quic::QuicTransport;

/// Receiving half of a connection's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half, held by transport internals.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Errors raised by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to resolve upstream {0}")]
    Resolve(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("connection terminated: {0}")]
    Terminated(String),

    #[error("request rejected by transport: {0}")]
    InvalidRequest(String),

    /// The upstream aborted this stream; the connection stays usable.
    #[error("stream failed: {0}")]
    StreamFailed(String),

    #[error("unknown stream {0}")]
    UnknownStream(StreamId),
}

impl TransportError {
    /// True when the request itself is at fault rather than the connection.
    pub fn is_request_error(&self) -> bool {
        matches!(self, TransportError::InvalidRequest(_))
    }
}

/// Factory for upstream connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: TransportConnection;

    /// Establish a fresh connection and its event stream.
    async fn connect(&self) -> Result<(Self::Connection, EventReceiver), TransportError>;
}

/// A single established upstream connection.
#[async_trait]
pub trait TransportConnection: Send + 'static {
    /// Reserve a new request stream.
    fn open_stream(&mut self) -> Result<StreamId, TransportError>;

    /// Send the request header block on an open stream.
    async fn send_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[HeaderField],
    ) -> Result<(), TransportError>;

    /// Send body bytes; `end_stream` finishes the request side of the stream.
    async fn send_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), TransportError>;

    /// Tear the connection down. Idempotent.
    fn close(&mut self);
}

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an upstream connection, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn request_errors_are_distinguished() {
        assert!(TransportError::InvalidRequest("bad header".into()).is_request_error());
        assert!(!TransportError::Terminated("idle timeout".into()).is_request_error());
        assert!(!TransportError::StreamFailed("H3_REQUEST_REJECTED".into()).is_request_error());
    }
}
