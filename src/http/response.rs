//! Relay outcome to HTTP response mapping.
//!
//! # Responsibilities
//! - Propagate the upstream status, headers, and body
//! - Map relay errors to status codes
//!
//! # Design Decisions
//! - 304 always gets an empty body, even when the upstream sent bytes or
//!   omitted content-type
//! - Hop-by-hop and framing headers are stripped; axum recomputes framing
//! - Upstream headers that are not valid HTTP/1.1 headers are dropped

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::mux::{Outcome, RelayError, ResultRecord};
use crate::transport::HeaderField;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Turn a multiplexer outcome into the ingress response.
pub fn relay_response(outcome: Outcome) -> Response {
    match outcome {
        Ok(record) => upstream_response(record),
        Err(RelayError::MissingContentType {
            status: Some(304),
            headers,
        }) => not_modified(&headers),
        Err(e) => error_response(&e),
    }
}

/// Status code for a relay error.
pub fn error_status(error: &RelayError) -> StatusCode {
    match error {
        RelayError::MalformedDescriptor(_) => StatusCode::BAD_REQUEST,
        RelayError::MissingContentType { .. } | RelayError::StreamReset(_) => StatusCode::BAD_GATEWAY,
        RelayError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn error_response(error: &RelayError) -> Response {
    (error_status(error), error.to_string()).into_response()
}

fn upstream_response(record: ResultRecord) -> Response {
    let Ok(status) = StatusCode::from_u16(record.status) else {
        tracing::warn!(status = record.status, "Upstream sent an invalid status code");
        return (StatusCode::BAD_GATEWAY, "upstream sent an invalid status code").into_response();
    };
    if status == StatusCode::NOT_MODIFIED {
        return not_modified(&record.headers);
    }

    let mut response = Response::new(Body::from(record.body.into_bytes()));
    *response.status_mut() = status;
    copy_headers(response.headers_mut(), &record.headers);
    response
}

fn not_modified(headers: &[HeaderField]) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    copy_headers(response.headers_mut(), headers);
    response
}

fn copy_headers(target: &mut HeaderMap, headers: &[HeaderField]) {
    for field in headers {
        if field.is_pseudo() || HOP_BY_HOP.contains(&field.name.to_ascii_lowercase().as_str()) {
            continue;
        }
        match (
            HeaderName::from_bytes(field.name.as_bytes()),
            HeaderValue::from_str(&field.value),
        ) {
            (Ok(name), Ok(value)) => {
                target.append(name, value);
            }
            _ => tracing::debug!(header = %field.name, "Dropping unrepresentable upstream header"),
        }
    }
}
