//! Request/response translation.
//!
//! Stateless: builds the wire header list for a descriptor and rebuilds a
//! `ResultRecord` from the events collected for one stream.

use bytes::{Bytes, BytesMut};

use crate::mux::error::RelayError;
use crate::mux::types::{RequestDescriptor, ResponseBody, ResultRecord, StreamEvent};
use crate::transport::HeaderField;

/// Ordered header list for a request.
///
/// Pseudo-headers come first in fixed order, then `user-agent`, then the
/// caller's headers. A caller header replaces the default of the same name
/// in place.
pub fn build_headers(descriptor: &RequestDescriptor, user_agent: &str) -> Vec<HeaderField> {
    let path = match descriptor.url.path_and_query.as_str() {
        "" => "/",
        path => path,
    };
    let defaults = [
        (":method", descriptor.method.as_str()),
        (":scheme", descriptor.url.scheme.as_str()),
        (":authority", descriptor.url.authority.as_str()),
        (":path", path),
        ("user-agent", user_agent),
    ];

    let mut headers = Vec::with_capacity(defaults.len() + descriptor.headers.len());
    for (name, default) in defaults {
        let mut overridden = false;
        for value in descriptor.headers.get_all(name) {
            headers.push(HeaderField::new(name, String::from_utf8_lossy(value.as_bytes())));
            overridden = true;
        }
        if !overridden {
            headers.push(HeaderField::new(name, default));
        }
    }

    for (name, value) in descriptor.headers.iter() {
        if defaults.iter().any(|(default, _)| *default == name.as_str()) {
            continue;
        }
        headers.push(HeaderField::new(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()),
        ));
    }
    headers
}

/// Split a response header block into status and ordinary headers.
fn split_status(block: &[HeaderField]) -> (Option<u16>, Vec<HeaderField>) {
    let status = block
        .iter()
        .find(|h| h.name == ":status")
        .and_then(|h| h.value.parse().ok());
    let headers = block.iter().filter(|h| !h.is_pseudo()).cloned().collect();
    (status, headers)
}

/// Status and headers of the first header block, if any arrived.
pub fn response_head(events: &[StreamEvent]) -> Option<(Option<u16>, Vec<HeaderField>)> {
    events.iter().find_map(|event| match event {
        StreamEvent::Headers { headers, .. } => Some(split_status(headers)),
        StreamEvent::Data { .. } => None,
    })
}

/// The error reported when `assemble_response` yields nothing.
pub fn missing_content_type(events: &[StreamEvent]) -> RelayError {
    let (status, headers) = response_head(events).unwrap_or_default();
    RelayError::MissingContentType { status, headers }
}

/// Rebuild a response from one stream's events.
///
/// Returns `None` when the stream has not ended, or ended without a status
/// or a non-empty `content-type`.
pub fn assemble_response(events: &[StreamEvent]) -> Option<ResultRecord> {
    let mut head = None;
    let mut body = BytesMut::new();
    let mut ended = false;

    for event in events {
        match event {
            StreamEvent::Headers { headers, end_stream } => {
                // Later header blocks (trailers) are ignored.
                if head.is_none() {
                    head = Some(split_status(headers));
                }
                ended = *end_stream;
            }
            StreamEvent::Data { data, end_stream } => {
                body.extend_from_slice(data);
                ended = *end_stream;
            }
        }
        if ended {
            break;
        }
    }
    if !ended {
        return None;
    }

    let (status, headers) = head?;
    let status = status?;
    let content_type = headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-type"))
        .map(|h| h.value.trim())
        .filter(|v| !v.is_empty())?;

    let body = if content_type.starts_with("image") {
        ResponseBody::Binary(body.freeze())
    } else {
        match String::from_utf8(body.to_vec()) {
            Ok(text) => ResponseBody::Text(text),
            Err(e) => ResponseBody::Binary(Bytes::from(e.into_bytes())),
        }
    };

    Some(ResultRecord {
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};

    fn head(status: &str, pairs: &[(&str, &str)], end_stream: bool) -> StreamEvent {
        let mut headers = vec![HeaderField::new(":status", status)];
        headers.extend(pairs.iter().map(|(k, v)| HeaderField::new(*k, *v)));
        StreamEvent::Headers { headers, end_stream }
    }

    fn data(bytes: &'static [u8], end_stream: bool) -> StreamEvent {
        StreamEvent::Data {
            data: Bytes::from_static(bytes),
            end_stream,
        }
    }

    fn names(headers: &[HeaderField]) -> Vec<&str> {
        headers.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn test_pseudo_headers_first_in_order() {
        let descriptor = RequestDescriptor::new("https://example.com/a", "GET").unwrap();
        let headers = build_headers(&descriptor, "relay/1.0");

        assert_eq!(
            headers,
            vec![
                HeaderField::new(":method", "GET"),
                HeaderField::new(":scheme", "https"),
                HeaderField::new(":authority", "example.com"),
                HeaderField::new(":path", "/a"),
                HeaderField::new("user-agent", "relay/1.0"),
            ]
        );
    }

    #[test]
    fn test_empty_path_defaults_to_root() {
        let mut descriptor = RequestDescriptor::new("https://example.com", "POST").unwrap();
        descriptor.url.path_and_query.clear();
        let headers = build_headers(&descriptor, "ua");
        assert_eq!(headers[3], HeaderField::new(":path", "/"));
    }

    #[test]
    fn test_caller_headers_override_and_append() {
        let mut caller = HeaderMap::new();
        caller.insert("User-Agent", HeaderValue::from_static("custom"));
        caller.append("accept-language", HeaderValue::from_static("en"));
        caller.append("accept-language", HeaderValue::from_static("de"));

        let descriptor = RequestDescriptor::new("https://example.com/q?x=1", "GET")
            .unwrap()
            .with_headers(caller);
        let headers = build_headers(&descriptor, "default-ua");

        assert_eq!(
            names(&headers),
            [":method", ":scheme", ":authority", ":path", "user-agent", "accept-language", "accept-language"]
        );
        assert_eq!(headers[3].value, "/q?x=1");
        assert_eq!(headers[4].value, "custom");
        assert_eq!(headers[5].value, "en");
        assert_eq!(headers[6].value, "de");
    }

    #[test]
    fn test_text_body_concatenated_in_order() {
        let events = vec![
            head("200", &[("content-type", "text/plain")], false),
            data(b"hello ", false),
            data(b"wor", false),
            data(b"ld", true),
        ];
        let record = assemble_response(&events).unwrap();

        assert_eq!(record.status, 200);
        assert_eq!(record.body, ResponseBody::Text("hello world".into()));
        assert_eq!(names(&record.headers), ["content-type"]);
    }

    #[test]
    fn test_image_body_left_raw() {
        let png: &'static [u8] = &[0x89, b'P', b'N', b'G', 0xff, 0x00];
        let events = vec![
            head("200", &[("content-type", "image/png")], false),
            data(&png[..3], false),
            data(&png[3..], true),
        ];
        let record = assemble_response(&events).unwrap();
        assert_eq!(record.body, ResponseBody::Binary(Bytes::from_static(png)));
    }

    #[test]
    fn test_invalid_utf8_kept_as_bytes() {
        let events = vec![
            head("200", &[("content-type", "application/octet-stream")], false),
            data(&[0xff, 0xfe], true),
        ];
        let record = assemble_response(&events).unwrap();
        assert_eq!(record.body.as_bytes(), &[0xff, 0xfe]);
    }

    #[test]
    fn test_missing_content_type_yields_none() {
        let events = vec![head("304", &[("etag", "\"abc\"")], false), data(b"", true)];
        assert!(assemble_response(&events).is_none());

        match missing_content_type(&events) {
            RelayError::MissingContentType { status, headers } => {
                assert_eq!(status, Some(304));
                assert_eq!(headers, vec![HeaderField::new("etag", "\"abc\"")]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_headers_only_response_ends_stream() {
        let events = vec![head("204", &[("content-type", "text/plain")], true)];
        let record = assemble_response(&events).unwrap();
        assert_eq!(record.status, 204);
        assert!(record.body.is_empty());
    }

    #[test]
    fn test_unfinished_stream_yields_none() {
        let events = vec![head("200", &[("content-type", "text/plain")], false), data(b"partial", false)];
        assert!(assemble_response(&events).is_none());
    }

    #[test]
    fn test_trailers_do_not_replace_head() {
        let events = vec![
            head("200", &[("content-type", "text/plain")], false),
            data(b"body", false),
            StreamEvent::Headers {
                headers: vec![HeaderField::new("grpc-status", "0")],
                end_stream: true,
            },
        ];
        let record = assemble_response(&events).unwrap();
        assert_eq!(record.header("grpc-status"), None);
        assert_eq!(record.body, ResponseBody::Text("body".into()));
    }
}
