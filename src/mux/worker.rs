//! Connection worker: one upstream connection, one request at a time.
//!
//! # State Machine
//! ```text
//! Connecting → Serving: connect succeeded
//! Serving → Serving: request completed, reset, or rejected as malformed
//! Serving → Connecting: connection died (in-flight request paused)
//! Connecting → Connecting: connect failed (backoff, breaker consulted)
//! Any → Stopped: queue closed and drained
//! ```
//!
//! A handshake alone does not prove the upstream healthy. The breaker is
//! closed and the backoff reset only once a connection carries a request to
//! completion; a connection lost before that counts as a failed connect.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::mux::collector::{StreamEventCollector, StreamOutcome};
use crate::mux::error::RelayError;
use crate::mux::queue::{Outcome, QueueEntry, WorkQueue};
use crate::mux::translator::{assemble_response, build_headers, missing_content_type};
use crate::observability::metrics;
use crate::resilience::{Admission, Backoff, CircuitBreaker};
use crate::transport::{
    ConnectionId, EventReceiver, StreamId, Transport, TransportConnection, TransportError,
};

/// A live connection and everything scoped to it.
struct Session<C> {
    id: ConnectionId,
    connection: C,
    events: EventReceiver,
    collector: StreamEventCollector,
    /// Requests this connection carried to a response or reset.
    completed: u64,
}

impl<C: TransportConnection> Session<C> {
    /// Wait for one stream to finish, pumping transport events meanwhile.
    async fn await_stream(&mut self, mut waiter: oneshot::Receiver<StreamOutcome>) -> StreamOutcome {
        loop {
            tokio::select! {
                biased;
                outcome = &mut waiter => {
                    return outcome.unwrap_or_else(|_| {
                        StreamOutcome::Terminated("stream waiter dropped".to_string())
                    });
                }
                event = self.events.recv() => match event {
                    Some(event) => self.collector.dispatch(event),
                    None => self.collector.terminate("transport event stream closed".to_string()),
                },
            }
        }
    }
}

/// What serving a session ended with.
enum SessionEnd {
    /// Queue closed and empty; the worker should stop.
    Drained,
    /// Connection died; reconnect and keep serving.
    Lost { completed: u64 },
}

/// What processing one request left the session in.
enum Step {
    Continue,
    Lost,
}

pub struct ConnectionWorker<T: Transport> {
    index: usize,
    transport: Arc<T>,
    queue: Arc<WorkQueue>,
    breaker: Arc<CircuitBreaker>,
    backoff: Backoff,
    user_agent: Arc<str>,
}

impl<T: Transport> ConnectionWorker<T> {
    pub fn new(
        index: usize,
        transport: Arc<T>,
        queue: Arc<WorkQueue>,
        breaker: Arc<CircuitBreaker>,
        backoff: Backoff,
        user_agent: Arc<str>,
    ) -> Self {
        Self {
            index,
            transport,
            queue,
            breaker,
            backoff,
            user_agent,
        }
    }

    /// Serve requests until the queue is closed and drained.
    pub async fn run(mut self) {
        tracing::debug!(worker = self.index, "Worker started");
        while let Some(session) = self.connect().await {
            match self.serve(session).await {
                SessionEnd::Drained => break,
                SessionEnd::Lost { completed: 0 } => {
                    self.connect_failed("connection lost before completing a request")
                        .await;
                }
                SessionEnd::Lost { .. } => {}
            }
        }
        tracing::debug!(worker = self.index, "Worker stopped");
    }

    /// Establish a connection, retrying with backoff. `None` once the queue
    /// has nothing left to serve.
    async fn connect(&mut self) -> Option<Session<T::Connection>> {
        loop {
            if self.queue.is_drained() {
                return None;
            }

            if let Admission::Rejected { retry_after } = self.breaker.try_acquire() {
                tracing::debug!(
                    worker = self.index,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Circuit open, holding connect"
                );
                tokio::time::sleep(retry_after).await;
                continue;
            }

            match self.transport.connect().await {
                Ok((connection, events)) => {
                    metrics::record_connect(true);

                    let id = ConnectionId::new();
                    tracing::info!(worker = self.index, connection_id = %id, "Upstream connection established");
                    return Some(Session {
                        id,
                        connection,
                        events,
                        collector: StreamEventCollector::new(id),
                        completed: 0,
                    });
                }
                Err(e) => {
                    metrics::record_connect(false);
                    self.connect_failed(e).await;
                }
            }
        }
    }

    /// Count a failed or useless connection against the breaker and wait out
    /// the next backoff delay.
    async fn connect_failed(&mut self, error: impl fmt::Display) {
        self.breaker.record_failure();
        let delay = self.backoff.next_delay();
        tracing::warn!(
            worker = self.index,
            error = %error,
            attempt = self.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Upstream connect failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }

    /// The connection has proven itself; clear the failure history once.
    fn mark_completed(&mut self, session: &mut Session<T::Connection>) {
        if session.completed == 0 {
            self.breaker.record_success();
            self.backoff.reset();
        }
        session.completed += 1;
    }

    async fn serve(&mut self, mut session: Session<T::Connection>) -> SessionEnd {
        loop {
            let Some(entry) = self.queue.next().await else {
                session.connection.close();
                return SessionEnd::Drained;
            };

            // Pick up anything that happened while idle, including a death.
            session.collector.drain(&mut session.events);
            if session.collector.is_terminated() {
                self.queue.pause(entry);
                session.connection.close();
                return SessionEnd::Lost {
                    completed: session.completed,
                };
            }

            if entry.completion.is_abandoned() {
                tracing::debug!(
                    request_id = %entry.descriptor.id,
                    "Submitter went away, skipping request"
                );
                continue;
            }

            match self.process(&mut session, entry).await {
                Step::Continue => {}
                Step::Lost => {
                    session.connection.close();
                    return SessionEnd::Lost {
                        completed: session.completed,
                    };
                }
            }
        }
    }

    /// Dispatch one request on the session and wait for its stream to end.
    async fn process(&mut self, session: &mut Session<T::Connection>, entry: QueueEntry) -> Step {
        let stream_id = match session.connection.open_stream() {
            Ok(stream_id) => stream_id,
            Err(e) => return self.send_failed(session, entry, None, e),
        };

        let started = Instant::now();
        let headers = build_headers(&entry.descriptor, &self.user_agent);
        let waiter = session.collector.register(stream_id);
        tracing::debug!(
            request_id = %entry.descriptor.id,
            connection_id = %session.id,
            stream_id = %stream_id,
            method = %entry.descriptor.method,
            "Dispatching request"
        );

        if let Err(e) = session.connection.send_headers(stream_id, &headers).await {
            return self.send_failed(session, entry, Some(stream_id), e);
        }
        let body = entry.descriptor.body.clone().unwrap_or_default();
        if let Err(e) = session.connection.send_data(stream_id, body, true).await {
            return self.send_failed(session, entry, Some(stream_id), e);
        }

        match session.await_stream(waiter).await {
            StreamOutcome::Completed(events) => {
                self.mark_completed(session);
                let outcome = assemble_response(&events).ok_or_else(|| missing_content_type(&events));
                log_completion(&entry, &outcome, started);
                entry.complete(outcome);
                Step::Continue
            }
            StreamOutcome::Reset(reason) => {
                self.mark_completed(session);
                tracing::warn!(request_id = %entry.descriptor.id, reason = %reason, "Upstream reset stream");
                entry.complete(Err(RelayError::StreamReset(reason)));
                Step::Continue
            }
            StreamOutcome::Terminated(_) => {
                self.queue.pause(entry);
                Step::Lost
            }
        }
    }

    fn send_failed(
        &self,
        session: &mut Session<T::Connection>,
        entry: QueueEntry,
        stream_id: Option<StreamId>,
        error: TransportError,
    ) -> Step {
        if let Some(stream_id) = stream_id {
            session.collector.forget(stream_id);
        }

        match error {
            TransportError::InvalidRequest(reason) => {
                tracing::warn!(request_id = %entry.descriptor.id, error = %reason, "Transport rejected request");
                entry.complete(Err(RelayError::MalformedDescriptor(reason)));
                return Step::Continue;
            }
            TransportError::StreamFailed(reason) => {
                tracing::warn!(request_id = %entry.descriptor.id, reason = %reason, "Upstream reset stream while sending");
                entry.complete(Err(RelayError::StreamReset(reason)));
                return Step::Continue;
            }
            _ => {}
        }

        session.collector.terminate(error.to_string());
        self.queue.pause(entry);
        Step::Lost
    }
}

fn log_completion(entry: &QueueEntry, outcome: &Outcome, started: Instant) {
    let elapsed = started.elapsed();
    match outcome {
        Ok(record) => {
            let bytes = record.body.as_bytes().len();
            let mbps = throughput_mbps(bytes, elapsed);
            tracing::info!(
                request_id = %entry.descriptor.id,
                status = record.status,
                bytes,
                elapsed_ms = elapsed.as_millis() as u64,
                mbps = format_args!("{mbps:.2}"),
                "Response received"
            );
        }
        Err(e) => tracing::info!(
            request_id = %entry.descriptor.id,
            error = %e,
            elapsed_ms = elapsed.as_millis() as u64,
            "Response unusable"
        ),
    }
}

/// Megabits per second; zero for an instantaneous transfer.
fn throughput_mbps(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 * 8.0) / secs / 1_000_000.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput() {
        assert_eq!(throughput_mbps(1_000_000, Duration::from_secs(2)), 4.0);
        assert_eq!(throughput_mbps(4096, Duration::ZERO), 0.0);
    }
}
