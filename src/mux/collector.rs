//! Per-connection stream event collector.
//!
//! Demultiplexes transport events by stream id into ordered per-stream
//! buffers and resolves the stream's waiter when it ends. Push streams are
//! tracked separately and only logged. Owned by exactly one worker.

use std::collections::HashMap;
use tokio::sync::{mpsc::error::TryRecvError, oneshot};

use crate::mux::types::StreamEvent;
use crate::transport::{ConnectionId, EventReceiver, PushId, StreamId, TransportEvent};

/// How a registered stream finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The stream ended normally; all its events in arrival order.
    Completed(Vec<StreamEvent>),
    /// The upstream aborted this stream only.
    Reset(String),
    /// The connection died before the stream ended.
    Terminated(String),
}

struct StreamState {
    events: Vec<StreamEvent>,
    waiter: oneshot::Sender<StreamOutcome>,
}

#[derive(Default)]
struct PushState {
    /// Request stream the push was promised on, when known.
    associated: Option<StreamId>,
    events: Vec<StreamEvent>,
}

pub struct StreamEventCollector {
    connection_id: ConnectionId,
    streams: HashMap<StreamId, StreamState>,
    pushes: HashMap<PushId, PushState>,
    terminated: Option<String>,
}

impl StreamEventCollector {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            streams: HashMap::new(),
            pushes: HashMap::new(),
            terminated: None,
        }
    }

    /// Start buffering events for `stream_id`.
    ///
    /// On a terminated connection the waiter resolves immediately.
    pub fn register(&mut self, stream_id: StreamId) -> oneshot::Receiver<StreamOutcome> {
        let (tx, rx) = oneshot::channel();
        if let Some(reason) = &self.terminated {
            let _ = tx.send(StreamOutcome::Terminated(reason.clone()));
            return rx;
        }

        let previous = self.streams.insert(
            stream_id,
            StreamState {
                events: Vec::new(),
                waiter: tx,
            },
        );
        if previous.is_some() {
            tracing::warn!(
                connection_id = %self.connection_id,
                stream_id = %stream_id,
                "Stream id registered twice; earlier waiter dropped"
            );
        }
        rx
    }

    /// Stop tracking a stream whose request never made it onto the wire.
    pub fn forget(&mut self, stream_id: StreamId) {
        self.streams.remove(&stream_id);
    }

    /// Route one transport event.
    pub fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::HeadersReceived {
                stream_id,
                push_id,
                headers,
                end_stream,
            } => {
                let event = StreamEvent::Headers { headers, end_stream };
                match push_id {
                    Some(push_id) => self.on_push_event(push_id, event),
                    None => self.on_stream_event(stream_id, event),
                }
            }
            TransportEvent::DataReceived {
                stream_id,
                push_id,
                data,
                end_stream,
            } => {
                let event = StreamEvent::Data { data, end_stream };
                match push_id {
                    Some(push_id) => self.on_push_event(push_id, event),
                    None => self.on_stream_event(stream_id, event),
                }
            }
            TransportEvent::PushPromiseReceived {
                stream_id,
                push_id,
                headers,
            } => {
                let path = headers
                    .iter()
                    .find(|h| h.name == ":path")
                    .map(|h| h.value.as_str())
                    .unwrap_or("");
                tracing::info!(
                    connection_id = %self.connection_id,
                    stream_id = %stream_id,
                    push_id = %push_id,
                    path,
                    "Push promise received"
                );
                self.pushes.entry(push_id).or_default().associated = Some(stream_id);
            }
            TransportEvent::StreamReset { stream_id, reason } => match self.streams.remove(&stream_id) {
                Some(state) => {
                    let _ = state.waiter.send(StreamOutcome::Reset(reason));
                }
                None => tracing::debug!(
                    connection_id = %self.connection_id,
                    stream_id = %stream_id,
                    "Reset for unknown stream discarded"
                ),
            },
            TransportEvent::ConnectionTerminated { reason } => self.terminate(reason),
        }
    }

    /// Pump every event already queued on `events` without waiting.
    ///
    /// A closed event channel counts as termination.
    pub fn drain(&mut self, events: &mut EventReceiver) {
        loop {
            match events.try_recv() {
                Ok(event) => self.dispatch(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.terminate("transport event stream closed".to_string());
                    break;
                }
            }
        }
    }

    /// Mark the connection dead and fail every pending waiter.
    pub fn terminate(&mut self, reason: String) {
        if self.terminated.is_some() {
            return;
        }
        tracing::info!(
            connection_id = %self.connection_id,
            pending_streams = self.streams.len(),
            reason = %reason,
            "Connection terminated"
        );
        for (_, state) in self.streams.drain() {
            let _ = state.waiter.send(StreamOutcome::Terminated(reason.clone()));
        }
        self.pushes.clear();
        self.terminated = Some(reason);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_some()
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn active_pushes(&self) -> usize {
        self.pushes.len()
    }

    fn on_stream_event(&mut self, stream_id: StreamId, event: StreamEvent) {
        let Some(state) = self.streams.get_mut(&stream_id) else {
            tracing::debug!(
                connection_id = %self.connection_id,
                stream_id = %stream_id,
                "Event for unknown stream discarded"
            );
            return;
        };

        let ended = event.end_stream();
        state.events.push(event);
        if ended {
            if let Some(state) = self.streams.remove(&stream_id) {
                let _ = state.waiter.send(StreamOutcome::Completed(state.events));
            }
        }
    }

    fn on_push_event(&mut self, push_id: PushId, event: StreamEvent) {
        let ended = event.end_stream();
        let push = self.pushes.entry(push_id).or_default();
        push.events.push(event);
        if ended {
            if let Some(push) = self.pushes.remove(&push_id) {
                let bytes: usize = push
                    .events
                    .iter()
                    .map(|e| match e {
                        StreamEvent::Data { data, .. } => data.len(),
                        StreamEvent::Headers { .. } => 0,
                    })
                    .sum();
                tracing::debug!(
                    connection_id = %self.connection_id,
                    push_id = %push_id,
                    associated_stream = ?push.associated.map(|s| s.0),
                    events = push.events.len(),
                    bytes,
                    "Pushed resource received and discarded"
                );
            }
        }
    }
}
