//! Shared utilities for integration testing: a scripted in-memory upstream.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quic_relay::config::RelayConfig;
use quic_relay::transport::{
    EventReceiver, EventSender, HeaderField, PushId, StreamId, Transport, TransportConnection,
    TransportError, TransportEvent,
};

/// Header name the mock transport refuses, to simulate a request-level error.
pub const REJECTED_HEADER: &str = "x-reject";

/// A request as the upstream saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub connection: usize,
    pub stream_id: StreamId,
    pub headers: Vec<HeaderField>,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }

    pub fn path(&self) -> &str {
        self.header(":path").unwrap_or("")
    }
}

/// How the mock upstream answers one request.
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond {
        status: u16,
        headers: Vec<HeaderField>,
        body: Bytes,
        delay: Duration,
        push: Option<(String, Bytes)>,
    },
    Reset(String),
    /// Never answer; only a connection termination ends the stream.
    Hang,
}

impl MockReply {
    pub fn text(status: u16, body: &str) -> Self {
        MockReply::Respond {
            status,
            headers: vec![HeaderField::new("content-type", "text/plain; charset=utf-8")],
            body: Bytes::copy_from_slice(body.as_bytes()),
            delay: Duration::ZERO,
            push: None,
        }
    }

    pub fn bytes(status: u16, content_type: Option<&str>, body: Bytes) -> Self {
        MockReply::Respond {
            status,
            headers: content_type
                .map(|ct| vec![HeaderField::new("content-type", ct)])
                .unwrap_or_default(),
            body,
            delay: Duration::ZERO,
            push: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let MockReply::Respond { headers, .. } = &mut self {
            headers.push(HeaderField::new(name, value));
        }
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        if let MockReply::Respond { delay: d, .. } = &mut self {
            *d = delay;
        }
        self
    }

    pub fn with_push(mut self, path: &str, body: &'static [u8]) -> Self {
        if let MockReply::Respond { push, .. } = &mut self {
            *push = Some((path.to_string(), Bytes::from_static(body)));
        }
        self
    }
}

type Handler = dyn Fn(&RecordedRequest) -> MockReply + Send + Sync;

struct LiveConnection {
    events: EventSender,
    closed: Arc<AtomicBool>,
}

struct Inner {
    handler: Box<Handler>,
    refuse_connects: AtomicBool,
    die_on_connect: AtomicBool,
    connect_attempts: AtomicUsize,
    connections: Mutex<Vec<LiveConnection>>,
    requests: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    overlapping_on_one_connection: AtomicBool,
}

/// Scripted upstream implementing `Transport`.
#[derive(Clone)]
pub struct MockUpstream {
    inner: Arc<Inner>,
}

impl MockUpstream {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockReply + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                handler: Box::new(handler),
                refuse_connects: AtomicBool::new(false),
                die_on_connect: AtomicBool::new(false),
                connect_attempts: AtomicUsize::new(0),
                connections: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                overlapping_on_one_connection: AtomicBool::new(false),
            }),
        }
    }

    /// Answers every request with 200 and the request path as a text body.
    pub fn echo() -> Self {
        Self::new(|request| MockReply::text(200, request.path()))
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.inner.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    /// Complete handshakes but close every new connection straight away.
    pub fn die_on_connect(&self, die: bool) {
        self.inner.die_on_connect.store(die, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Kill every live connection as if the network dropped.
    pub fn terminate_all(&self, reason: &str) {
        let connections = std::mem::take(&mut *self.inner.connections.lock().unwrap());
        for connection in connections {
            connection.closed.store(true, Ordering::SeqCst);
            let _ = connection.events.send(TransportEvent::ConnectionTerminated {
                reason: reason.to_string(),
            });
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// True if any single connection ever carried two requests at once.
    pub fn saw_overlap_on_one_connection(&self) -> bool {
        self.inner.overlapping_on_one_connection.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` requests reached the upstream.
    pub async fn wait_for_requests(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.requests().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("upstream never saw the expected requests");
    }
}

#[async_trait]
impl Transport for MockUpstream {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<(MockConnection, EventReceiver), TransportError> {
        let index = self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.refuse_connects.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        if self.inner.die_on_connect.load(Ordering::SeqCst) {
            closed.store(true, Ordering::SeqCst);
            let _ = tx.send(TransportEvent::ConnectionTerminated {
                reason: "H3_NO_ERROR: goaway after handshake".to_string(),
            });
        } else {
            self.inner.connections.lock().unwrap().push(LiveConnection {
                events: tx.clone(),
                closed: Arc::clone(&closed),
            });
        }

        let connection = MockConnection {
            index,
            upstream: self.clone(),
            events: tx,
            closed,
            next_stream: 0,
            streams: HashMap::new(),
            busy: Arc::new(AtomicUsize::new(0)),
        };
        Ok((connection, rx))
    }
}

pub struct MockConnection {
    index: usize,
    upstream: MockUpstream,
    events: EventSender,
    closed: Arc<AtomicBool>,
    next_stream: u64,
    streams: HashMap<StreamId, (Vec<HeaderField>, BytesMut)>,
    busy: Arc<AtomicUsize>,
}

impl MockConnection {
    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Terminated("mock connection closed".to_string()));
        }
        Ok(())
    }

    fn finish(&mut self, stream_id: StreamId) {
        let Some((headers, body)) = self.streams.remove(&stream_id) else {
            return;
        };
        let request = RecordedRequest {
            connection: self.index,
            stream_id,
            headers,
            body: body.freeze(),
        };

        let inner = &self.upstream.inner;
        inner.requests.lock().unwrap().push(request.clone());
        let reply = (inner.handler)(&request);

        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.busy.fetch_add(1, Ordering::SeqCst) > 0 {
            inner.overlapping_on_one_connection.store(true, Ordering::SeqCst);
        }

        let upstream = self.upstream.clone();
        let events = self.events.clone();
        let busy = Arc::clone(&self.busy);
        tokio::spawn(async move {
            let done = || {
                upstream.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
                busy.fetch_sub(1, Ordering::SeqCst);
            };
            match reply {
                MockReply::Hang => {}
                MockReply::Reset(reason) => {
                    done();
                    let _ = events.send(TransportEvent::StreamReset { stream_id, reason });
                }
                MockReply::Respond {
                    status,
                    headers,
                    body,
                    delay,
                    push,
                } => {
                    tokio::time::sleep(delay).await;
                    done();
                    if let Some((path, pushed)) = push {
                        send_push(&events, stream_id, &path, pushed);
                    }
                    let mut block = vec![HeaderField::new(":status", status.to_string())];
                    block.extend(headers);
                    let _ = events.send(TransportEvent::HeadersReceived {
                        stream_id,
                        push_id: None,
                        headers: block,
                        end_stream: body.is_empty(),
                    });
                    if !body.is_empty() {
                        // Split in two to exercise chunk reassembly.
                        let mut body = body;
                        let tail = body.split_off(body.len() / 2);
                        let _ = events.send(TransportEvent::DataReceived {
                            stream_id,
                            push_id: None,
                            data: body,
                            end_stream: false,
                        });
                        let _ = events.send(TransportEvent::DataReceived {
                            stream_id,
                            push_id: None,
                            data: tail,
                            end_stream: true,
                        });
                    }
                }
            }
        });
    }
}

fn send_push(events: &EventSender, stream_id: StreamId, path: &str, body: Bytes) {
    let push_id = PushId(stream_id.0 + 1);
    let push_stream = StreamId(stream_id.0 + 3);
    let _ = events.send(TransportEvent::PushPromiseReceived {
        stream_id,
        push_id,
        headers: vec![HeaderField::new(":path", path)],
    });
    let _ = events.send(TransportEvent::HeadersReceived {
        stream_id: push_stream,
        push_id: Some(push_id),
        headers: vec![HeaderField::new(":status", "200")],
        end_stream: false,
    });
    let _ = events.send(TransportEvent::DataReceived {
        stream_id: push_stream,
        push_id: Some(push_id),
        data: body,
        end_stream: true,
    });
}

#[async_trait]
impl TransportConnection for MockConnection {
    fn open_stream(&mut self) -> Result<StreamId, TransportError> {
        self.check_open()?;
        let stream_id = StreamId(self.next_stream);
        self.next_stream += 4;
        self.streams.insert(stream_id, (Vec::new(), BytesMut::new()));
        Ok(stream_id)
    }

    async fn send_headers(
        &mut self,
        stream_id: StreamId,
        headers: &[HeaderField],
    ) -> Result<(), TransportError> {
        self.check_open()?;
        if headers.iter().any(|h| h.name == REJECTED_HEADER) {
            self.streams.remove(&stream_id);
            return Err(TransportError::InvalidRequest(format!(
                "header {REJECTED_HEADER} not allowed"
            )));
        }
        let Some((recorded, _)) = self.streams.get_mut(&stream_id) else {
            return Err(TransportError::UnknownStream(stream_id));
        };
        recorded.extend_from_slice(headers);
        Ok(())
    }

    async fn send_data(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        let Some((_, body)) = self.streams.get_mut(&stream_id) else {
            return Err(TransportError::UnknownStream(stream_id));
        };
        body.extend_from_slice(&data);
        if end_stream {
            self.finish(stream_id);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Config tuned for fast tests.
pub fn test_config(pool: usize) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.pool.open_connections = pool;
    config.reconnect.base_delay_ms = 10;
    config.reconnect.max_delay_ms = 50;
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.open_ms = 200;
    config.lifecycle.shutdown_grace_secs = 1;
    config
}
