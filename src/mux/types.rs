//! Request and response types flowing through the multiplexer.

use bytes::Bytes;
use http::HeaderMap;
use std::fmt;
use std::str::FromStr;
use url::{Position, Url};
use uuid::Uuid;

use crate::mux::error::RelayError;
use crate::transport::HeaderField;

/// Correlation id for one relayed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RequestId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Methods the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl FromStr for Method {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("GET") {
            Ok(Method::Get)
        } else if s.eq_ignore_ascii_case("POST") {
            Ok(Method::Post)
        } else {
            Err(RelayError::MalformedDescriptor(format!("unsupported method {s:?}")))
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target URL split into the parts that become pseudo-headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    pub scheme: String,
    /// Host plus explicit port, without userinfo.
    pub authority: String,
    /// Path and query; may be empty.
    pub path_and_query: String,
}

impl RequestUrl {
    pub fn parse(input: &str) -> Result<Self, RelayError> {
        let url = Url::parse(input)
            .map_err(|e| RelayError::MalformedDescriptor(format!("invalid url {input:?}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| RelayError::MalformedDescriptor(format!("url {input:?} has no host")))?;

        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            authority,
            path_and_query: url[Position::BeforePath..Position::AfterQuery].to_string(),
        })
    }
}

/// A request waiting to be relayed upstream.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub id: RequestId,
    pub url: RequestUrl,
    pub method: Method,
    /// Caller headers; case-insensitive, multiple values per key.
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    /// Build a descriptor from raw url and method strings.
    pub fn new(url: &str, method: &str) -> Result<Self, RelayError> {
        if url.is_empty() {
            return Err(RelayError::MalformedDescriptor("url is required".into()));
        }
        if method.is_empty() {
            return Err(RelayError::MalformedDescriptor("method is required".into()));
        }

        Ok(Self {
            id: RequestId::new(),
            url: RequestUrl::parse(url)?,
            method: method.parse()?,
            headers: HeaderMap::new(),
            body: None,
        })
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Textual content, decoded as UTF-8.
    Text(String),
    /// Images and anything that is not valid UTF-8, untouched.
    Binary(Bytes),
}

impl ResponseBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ResponseBody::Text(text) => text.as_bytes(),
            ResponseBody::Binary(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            ResponseBody::Text(text) => Bytes::from(text),
            ResponseBody::Binary(bytes) => bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// The relayed response, produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub status: u16,
    /// Response headers in arrival order, pseudo-headers removed.
    pub headers: Vec<HeaderField>,
    pub body: ResponseBody,
}

impl ResultRecord {
    /// First value of a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// A transport event after it has been attributed to one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Headers {
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    Data {
        data: Bytes,
        end_stream: bool,
    },
}

impl StreamEvent {
    pub fn end_stream(&self) -> bool {
        match self {
            StreamEvent::Headers { end_stream, .. } | StreamEvent::Data { end_stream, .. } => *end_stream,
        }
    }
}
