//! HTTP/3 over QUIC transport backed by `quinn` and `h3`.
//!
//! Each `connect` performs a full QUIC handshake and HTTP/3 setup. A driver
//! task polls the h3 connection and reports `ConnectionTerminated` when it
//! closes; a reader task per request stream turns the response into
//! `HeadersReceived`/`DataReceived` events.

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use h3::error::ErrorLevel;
use http::header::{HeaderName, HeaderValue};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::{TransportConfig, UpstreamConfig};
use crate::transport::{
    EventReceiver, EventSender, HeaderField, StreamId, Transport, TransportConnection,
    TransportError, TransportEvent,
};

type H3RequestStream = h3::client::RequestStream<h3_quinn::BidiStream<Bytes>, Bytes>;
type H3SendRequest = h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>;

/// Headers HTTP/3 forbids on the wire (RFC 9114 §4.2).
const CONNECTION_SPECIFIC: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Connects to the configured upstream over QUIC.
pub struct QuicTransport {
    endpoint: quinn::Endpoint,
    client_config: quinn::ClientConfig,
    host: String,
    port: u16,
    server_name: String,
    connect_timeout: Duration,
}

impl QuicTransport {
    /// Create the client endpoint. Must be called inside a Tokio runtime.
    pub fn new(upstream: &UpstreamConfig, config: &TransportConfig) -> Result<Self, TransportError> {
        let client_config = client_config(config)?;
        let endpoint = quinn::Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))
            .map_err(|e| TransportError::Connect(format!("failed to bind client endpoint: {e}")))?;

        Ok(Self {
            endpoint,
            client_config,
            host: upstream.host.clone(),
            port: upstream.port,
            server_name: upstream.server_name().to_string(),
            connect_timeout: config.connect_timeout(),
        })
    }

    async fn resolve(&self) -> Result<SocketAddr, TransportError> {
        let target = format!("{}:{}", self.host, self.port);
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(target.as_str())
            .await
            .map_err(|e| TransportError::Resolve(format!("{target}: {e}")))?
            .collect();

        // The endpoint socket is IPv4.
        addrs
            .into_iter()
            .find(SocketAddr::is_ipv4)
            .ok_or(TransportError::Resolve(target))
    }
}

#[async_trait]
impl Transport for QuicTransport {
    type Connection = QuicConnection;

    async fn connect(&self) -> Result<(QuicConnection, EventReceiver), TransportError> {
        let remote = self.resolve().await?;
        let connecting = self
            .endpoint
            .connect_with(self.client_config.clone(), remote, &self.server_name)
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let connection = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (mut h3_driver, send_request) = h3::client::new(h3_quinn::Connection::new(connection.clone()))
            .await
            .map_err(|e| TransportError::Connect(format!("HTTP/3 setup failed: {e}")))?;

        let (events, receiver) = mpsc::unbounded_channel();
        let driver_events = events.clone();
        let driver = tokio::spawn(async move {
            let outcome = std::future::poll_fn(|cx| h3_driver.poll_close(cx)).await;
            let _ = driver_events.send(TransportEvent::ConnectionTerminated {
                reason: format!("{outcome:?}"),
            });
        });

        tracing::debug!(remote = %remote, server_name = %self.server_name, "QUIC connection established");

        Ok((
            QuicConnection {
                connection,
                send_request,
                streams: HashMap::new(),
                next_stream: 0,
                events,
                driver,
                readers: JoinSet::new(),
            },
            receiver,
        ))
    }
}

enum QuicStream {
    /// Id handed out, headers not yet sent.
    Reserved,
    /// Request headers sent, body still being written.
    Sending(H3RequestStream),
}

/// One established HTTP/3 connection.
pub struct QuicConnection {
    connection: quinn::Connection,
    send_request: H3SendRequest,
    streams: HashMap<StreamId, QuicStream>,
    next_stream: u64,
    events: EventSender,
    driver: JoinHandle<()>,
    readers: JoinSet<()>,
}

#[async_trait]
impl TransportConnection for QuicConnection {
    fn open_stream(&mut self) -> Result<StreamId, TransportError> {
        if let Some(reason) = self.connection.close_reason() {
            return Err(TransportError::Terminated(reason.to_string()));
        }
        // Client-initiated bidirectional stream ids: 0, 4, 8, ...
        let id = StreamId(self.next_stream);
        self.next_stream += 4;
        self.streams.insert(id, QuicStream::Reserved);
        Ok(id)
    }

    async fn send_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[HeaderField],
    ) -> Result<(), TransportError> {
        match self.streams.get(&stream_id) {
            Some(QuicStream::Reserved) => {}
            Some(QuicStream::Sending(_)) => {
                return Err(TransportError::InvalidRequest(format!(
                    "headers already sent on stream {stream_id}"
                )))
            }
            None => return Err(TransportError::UnknownStream(stream_id)),
        }

        let request = to_http_request(headers)?;
        let stream = match self.send_request.send_request(request).await {
            Ok(stream) => stream,
            Err(e) => return Err(classify(&self.connection, e)),
        };
        self.streams.insert(stream_id, QuicStream::Sending(stream));
        Ok(())
    }

    async fn send_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), TransportError> {
        let connection = &self.connection;
        let Some(QuicStream::Sending(stream)) = self.streams.get_mut(&stream_id) else {
            return Err(TransportError::UnknownStream(stream_id));
        };

        if !data.is_empty() {
            stream.send_data(data).await.map_err(|e| classify(connection, e))?;
        }
        if end_stream {
            stream.finish().await.map_err(|e| classify(connection, e))?;
            if let Some(QuicStream::Sending(stream)) = self.streams.remove(&stream_id) {
                while self.readers.try_join_next().is_some() {}
                self.readers.spawn(read_response(
                    stream_id,
                    stream,
                    self.connection.clone(),
                    self.events.clone(),
                ));
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.connection.close(quinn::VarInt::from_u32(0), b"relay closing");
        self.driver.abort();
        self.readers.abort_all();
        self.streams.clear();
    }
}

impl Drop for QuicConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stream until the response is complete, then emit the end-of-stream marker.
async fn read_response(
    stream_id: StreamId,
    mut stream: H3RequestStream,
    connection: quinn::Connection,
    events: EventSender,
) {
    let response = match stream.recv_response().await {
        Ok(response) => response,
        Err(e) => {
            let _ = events.send(stream_failure(stream_id, &connection, e));
            return;
        }
    };

    let mut headers = Vec::with_capacity(response.headers().len() + 1);
    headers.push(HeaderField::new(":status", response.status().as_str()));
    for (name, value) in response.headers() {
        headers.push(HeaderField::new(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()),
        ));
    }
    let _ = events.send(TransportEvent::HeadersReceived {
        stream_id,
        push_id: None,
        headers,
        end_stream: false,
    });

    loop {
        match stream.recv_data().await {
            Ok(Some(mut chunk)) => {
                let data = chunk.copy_to_bytes(chunk.remaining());
                let _ = events.send(TransportEvent::DataReceived {
                    stream_id,
                    push_id: None,
                    data,
                    end_stream: false,
                });
            }
            Ok(None) => {
                let _ = events.send(TransportEvent::DataReceived {
                    stream_id,
                    push_id: None,
                    data: Bytes::new(),
                    end_stream: true,
                });
                return;
            }
            Err(e) => {
                let _ = events.send(stream_failure(stream_id, &connection, e));
                return;
            }
        }
    }
}

/// Which side of the connection an h3 error took down.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Failure {
    /// The connection is closed or closing (GOAWAY, idle timeout, QUIC error).
    Connection(String),
    /// Only this stream was aborted.
    Stream(String),
}

/// Scope an h3 error.
///
/// A stream-level error still counts as a connection failure once quinn
/// reports the connection closed.
fn failure_scope(level: ErrorLevel, close_reason: Option<String>, message: String) -> Failure {
    match (level, close_reason) {
        (_, Some(reason)) => Failure::Connection(reason),
        (ErrorLevel::ConnectionError, None) => Failure::Connection(message),
        (ErrorLevel::StreamError, None) => Failure::Stream(message),
    }
}

fn scope(connection: &quinn::Connection, error: &h3::Error) -> Failure {
    failure_scope(
        error.get_error_level(),
        connection.close_reason().map(|reason| reason.to_string()),
        error.to_string(),
    )
}

/// Turn a response-side h3 error into the event the collector expects.
fn stream_failure(stream_id: StreamId, connection: &quinn::Connection, error: h3::Error) -> TransportEvent {
    match scope(connection, &error) {
        Failure::Connection(reason) => TransportEvent::ConnectionTerminated { reason },
        Failure::Stream(reason) => TransportEvent::StreamReset { stream_id, reason },
    }
}

/// Turn a send-side h3 error into a transport error. Never `InvalidRequest`:
/// the request was already accepted by `to_http_request`.
fn classify(connection: &quinn::Connection, error: h3::Error) -> TransportError {
    match scope(connection, &error) {
        Failure::Connection(reason) => TransportError::Terminated(reason),
        Failure::Stream(reason) => TransportError::StreamFailed(reason),
    }
}

/// Fold an ordered header list back into the `http::Request` h3 expects.
fn to_http_request(headers: &[HeaderField]) -> Result<http::Request<()>, TransportError> {
    let invalid = |what: String| TransportError::InvalidRequest(what);

    let mut method = None;
    let mut scheme = None;
    let mut authority = None;
    let mut path = None;
    let mut fields = http::HeaderMap::new();

    for field in headers {
        match field.name.as_str() {
            ":method" => method = Some(field.value.as_str()),
            ":scheme" => scheme = Some(field.value.as_str()),
            ":authority" => authority = Some(field.value.as_str()),
            ":path" => path = Some(field.value.as_str()),
            name if name.starts_with(':') => {
                return Err(invalid(format!("unsupported pseudo-header {name}")))
            }
            name if CONNECTION_SPECIFIC.contains(&name) => {
                tracing::debug!(header = name, "Dropping connection-specific header");
            }
            name => {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| invalid(format!("header name {name:?}: {e}")))?;
                let value = HeaderValue::from_str(&field.value)
                    .map_err(|e| invalid(format!("header {name}: {e}")))?;
                fields.append(name, value);
            }
        }
    }

    let uri = http::Uri::builder()
        .scheme(scheme.ok_or_else(|| invalid(":scheme missing".into()))?)
        .authority(authority.ok_or_else(|| invalid(":authority missing".into()))?)
        .path_and_query(path.unwrap_or("/"))
        .build()
        .map_err(|e| invalid(e.to_string()))?;

    let mut request = http::Request::builder()
        .method(method.ok_or_else(|| invalid(":method missing".into()))?)
        .uri(uri)
        .body(())
        .map_err(|e| invalid(e.to_string()))?;
    *request.headers_mut() = fields;
    Ok(request)
}

fn client_config(config: &TransportConfig) -> Result<quinn::ClientConfig, TransportError> {
    let tls_error = |e: String| TransportError::Connect(format!("TLS configuration: {e}"));

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut tls = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .map_err(|e| tls_error(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    tls.alpn_protocols = vec![b"h3".to_vec()];

    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls)
        .map_err(|e| tls_error(e.to_string()))?;
    let mut client = quinn::ClientConfig::new(Arc::new(crypto));

    let mut transport = quinn::TransportConfig::default();
    let idle = quinn::IdleTimeout::try_from(config.idle_timeout())
        .map_err(|e| tls_error(format!("idle timeout: {e}")))?;
    transport.max_idle_timeout(Some(idle));
    if config.keep_alive_secs > 0 {
        transport.keep_alive_interval(Some(config.keep_alive()));
    }
    client.transport_config(Arc::new(transport));

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<HeaderField> {
        pairs.iter().map(|(k, v)| HeaderField::new(*k, *v)).collect()
    }

    #[test]
    fn test_request_from_header_list() {
        let request = to_http_request(&fields(&[
            (":method", "POST"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":path", "/watch?v=1"),
            ("user-agent", "relay-test"),
            ("accept", "text/html"),
            ("accept", "image/png"),
        ]))
        .unwrap();

        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.uri().to_string(), "https://example.com/watch?v=1");
        assert_eq!(request.headers()["user-agent"], "relay-test");
        assert_eq!(request.headers().get_all("accept").iter().count(), 2);
    }

    #[test]
    fn test_connection_specific_headers_dropped() {
        let request = to_http_request(&fields(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":path", "/"),
            ("connection", "keep-alive"),
            ("transfer-encoding", "chunked"),
        ]))
        .unwrap();
        assert!(request.headers().is_empty());
    }

    #[test]
    fn test_connection_level_errors_terminate() {
        let goaway = failure_scope(ErrorLevel::ConnectionError, None, "closing".into());
        assert_eq!(goaway, Failure::Connection("closing".into()));

        let closed = failure_scope(
            ErrorLevel::StreamError,
            Some("timed out".into()),
            "H3_REQUEST_CANCELLED".into(),
        );
        assert_eq!(closed, Failure::Connection("timed out".into()));
    }

    #[test]
    fn test_stream_level_errors_stay_on_the_stream() {
        let reset = failure_scope(ErrorLevel::StreamError, None, "H3_REQUEST_REJECTED".into());
        assert_eq!(reset, Failure::Stream("H3_REQUEST_REJECTED".into()));
    }

    #[test]
    fn test_missing_or_unknown_pseudo_headers_rejected() {
        let missing = to_http_request(&fields(&[(":method", "GET"), (":path", "/")]));
        assert!(matches!(missing, Err(TransportError::InvalidRequest(_))));

        let unknown = to_http_request(&fields(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":authority", "example.com"),
            (":protocol", "websocket"),
        ]));
        assert!(matches!(unknown, Err(TransportError::InvalidRequest(_))));
    }
}
