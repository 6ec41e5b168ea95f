//! Caller-facing relay errors.

use thiserror::Error;

use crate::transport::HeaderField;

/// Why a submitted request did not produce a `ResultRecord`.
///
/// Connection failures never appear here: they pause the request and
/// reconnect instead.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Bad url, unsupported method, or a header the transport refused.
    #[error("malformed request: {0}")]
    MalformedDescriptor(String),

    /// The upstream finished the stream without a usable content-type.
    #[error("upstream response (status {status:?}) carried no content-type")]
    MissingContentType {
        status: Option<u16>,
        headers: Vec<HeaderField>,
    },

    /// The upstream aborted this request's stream.
    #[error("upstream reset the stream: {0}")]
    StreamReset(String),

    /// The multiplexer shut down before the request completed.
    #[error("relay is shutting down")]
    Stopped,
}

impl RelayError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::MalformedDescriptor(_) => "malformed",
            RelayError::MissingContentType { .. } => "missing_content_type",
            RelayError::StreamReset(_) => "stream_reset",
            RelayError::Stopped => "stopped",
        }
    }
}
