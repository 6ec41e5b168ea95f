//! Wire-level types shared between the transport and the multiplexer.

use bytes::Bytes;
use std::fmt;

/// Identifier of a request stream within one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a server push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushId(pub u64);

impl fmt::Display for PushId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push-{}", self.0)
    }
}

/// One header line. Names are lower-case on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Pseudo-headers carry the request/status line (`:method`, `:status`, ...).
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

/// Events delivered by a transport connection, in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A header block arrived on a request stream (or on a push stream when
    /// `push_id` is set).
    HeadersReceived {
        stream_id: StreamId,
        push_id: Option<PushId>,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// Body bytes arrived.
    DataReceived {
        stream_id: StreamId,
        push_id: Option<PushId>,
        data: Bytes,
        end_stream: bool,
    },
    /// The server announced a pushed resource.
    PushPromiseReceived {
        stream_id: StreamId,
        push_id: PushId,
        headers: Vec<HeaderField>,
    },
    /// The upstream aborted one stream; the connection stays usable.
    StreamReset { stream_id: StreamId, reason: String },
    /// The connection is gone. Nothing further will arrive.
    ConnectionTerminated { reason: String },
}
