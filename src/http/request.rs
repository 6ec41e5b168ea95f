//! Ingress request parsing.
//!
//! # Responsibilities
//! - Deserialize the JSON request body
//! - Validate url, method, and header names
//! - Build a `RequestDescriptor` carrying the ingress request id
//!
//! # Design Decisions
//! - Every validation failure is a `MalformedDescriptor` (400)
//! - Header names are lowercased; order follows the sorted key order
//! - An empty `data` string means no body

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::mux::{RelayError, RequestDescriptor, RequestId};

/// Header carrying the per-request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// JSON body accepted on `POST /`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngressRequest {
    pub url: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub data: Option<String>,
}

impl IngressRequest {
    /// Validate and convert into a descriptor.
    ///
    /// `request_id` is the ingress correlation id; a fresh one is generated
    /// when it is absent or not a UUID.
    pub fn into_descriptor(self, request_id: Option<&str>) -> Result<RequestDescriptor, RelayError> {
        let url = self
            .url
            .ok_or_else(|| RelayError::MalformedDescriptor("missing url".to_string()))?;
        let method = self
            .method
            .ok_or_else(|| RelayError::MalformedDescriptor("missing method".to_string()))?;

        let mut descriptor = RequestDescriptor::new(&url, &method)?;
        if let Some(id) = request_id.and_then(|id| Uuid::parse_str(id).ok()) {
            descriptor = descriptor.with_id(RequestId::from(id));
        }

        if let Some(headers) = self.headers {
            descriptor = descriptor.with_headers(header_map(headers)?);
        }

        match self.data {
            Some(data) if !data.is_empty() => Ok(descriptor.with_body(data)),
            _ => Ok(descriptor),
        }
    }
}

fn header_map(headers: BTreeMap<String, String>) -> Result<HeaderMap, RelayError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
            .map_err(|_| RelayError::MalformedDescriptor(format!("invalid header name {name:?}")))?;
        let header_value = HeaderValue::from_str(&value)
            .map_err(|_| RelayError::MalformedDescriptor(format!("invalid value for header {name:?}")))?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::Method;

    fn parse(json: &str) -> IngressRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_minimal_request() {
        let descriptor = parse(r#"{"url": "https://www.youtube.com/watch?v=x", "method": "get"}"#)
            .into_descriptor(None)
            .unwrap();

        assert_eq!(descriptor.method, Method::Get);
        assert_eq!(descriptor.url.authority, "www.youtube.com");
        assert_eq!(descriptor.url.path_and_query, "/watch?v=x");
        assert!(descriptor.headers.is_empty());
        assert!(descriptor.body.is_none());
    }

    #[test]
    fn test_headers_and_body() {
        let descriptor = parse(
            r#"{"url": "https://example.com/api", "method": "POST",
                "headers": {"Content-Type": "application/json", "x-trace": "1"},
                "data": "{\"k\":1}"}"#,
        )
        .into_descriptor(None)
        .unwrap();

        assert_eq!(descriptor.headers["content-type"], "application/json");
        assert_eq!(descriptor.headers["x-trace"], "1");
        assert_eq!(descriptor.body.as_deref(), Some(&b"{\"k\":1}"[..]));
    }

    #[test]
    fn test_empty_data_means_no_body() {
        let descriptor = parse(r#"{"url": "https://example.com/", "method": "POST", "data": ""}"#)
            .into_descriptor(None)
            .unwrap();
        assert!(descriptor.body.is_none());
    }

    #[test]
    fn test_request_id_is_adopted() {
        let id = Uuid::new_v4();
        let descriptor = parse(r#"{"url": "https://example.com/", "method": "GET"}"#)
            .into_descriptor(Some(&id.to_string()))
            .unwrap();
        assert_eq!(descriptor.id.as_uuid(), id);

        let descriptor = parse(r#"{"url": "https://example.com/", "method": "GET"}"#)
            .into_descriptor(Some("not-a-uuid"))
            .unwrap();
        assert_ne!(descriptor.id.as_uuid(), id);
    }

    #[test]
    fn test_invalid_requests_are_malformed() {
        let cases = [
            r#"{"method": "GET"}"#,
            r#"{"url": "https://example.com/"}"#,
            r#"{"url": "https://example.com/", "method": "DELETE"}"#,
            r#"{"url": "not a url", "method": "GET"}"#,
            r#"{"url": "https://example.com/", "method": "GET", "headers": {"bad header": "x"}}"#,
            r#"{"url": "https://example.com/", "method": "GET", "headers": {"x": "line\nbreak"}}"#,
        ];
        for case in cases {
            let result = parse(case).into_descriptor(None);
            assert!(
                matches!(result, Err(RelayError::MalformedDescriptor(_))),
                "expected malformed for {case}"
            );
        }
    }
}
