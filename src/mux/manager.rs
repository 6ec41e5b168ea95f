//! Multiplexer: the public face of the relay core.
//!
//! Owns the shared work queue and a fixed pool of connection workers.
//! Callers submit a descriptor and await its result; they never see
//! connections, streams, or reconnects.

use futures_util::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::RelayConfig;
use crate::mux::error::RelayError;
use crate::mux::queue::{QueueEntry, WorkQueue};
use crate::mux::types::{RequestDescriptor, ResultRecord};
use crate::mux::worker::ConnectionWorker;
use crate::resilience::{Backoff, CircuitBreaker, CircuitState};
use crate::transport::Transport;

pub struct Multiplexer {
    queue: Arc<WorkQueue>,
    breaker: Arc<CircuitBreaker>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pool_size: usize,
}

impl Multiplexer {
    /// Spawn `pool.open_connections` workers over `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<T: Transport>(config: &RelayConfig, transport: T) -> Arc<Self> {
        let pool_size = config.pool.open_connections.max(1);
        let transport = Arc::new(transport);
        let queue = Arc::new(WorkQueue::new());
        let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));
        let user_agent: Arc<str> = Arc::from(config.upstream.user_agent.as_str());

        let workers = (0..pool_size)
            .map(|index| {
                let worker = ConnectionWorker::new(
                    index,
                    Arc::clone(&transport),
                    Arc::clone(&queue),
                    Arc::clone(&breaker),
                    Backoff::new(&config.reconnect),
                    Arc::clone(&user_agent),
                );
                tokio::spawn(worker.run().instrument(tracing::info_span!("worker", index)))
            })
            .collect();

        tracing::info!(
            pool_size,
            upstream = %format!("{}:{}", config.upstream.host, config.upstream.port),
            "Multiplexer started"
        );

        Arc::new(Self {
            queue,
            breaker,
            workers: Mutex::new(workers),
            pool_size,
        })
    }

    /// Relay one request and wait for its result.
    ///
    /// Connection loss is retried internally; only request-level failures
    /// and shutdown surface as errors. Dropping the returned future does
    /// not disturb the worker handling the request.
    pub async fn submit(&self, descriptor: RequestDescriptor) -> Result<ResultRecord, RelayError> {
        let (entry, receiver) = QueueEntry::new(descriptor);
        if let Err(entry) = self.queue.push(entry) {
            entry.complete(Err(RelayError::Stopped));
            return Err(RelayError::Stopped);
        }
        receiver.await.unwrap_or(Err(RelayError::Stopped))
    }

    /// Stop accepting requests, let workers finish what is queued within
    /// `grace`, then abort them and fail whatever is left with `Stopped`.
    pub async fn shutdown(&self, grace: Duration) {
        self.queue.close();
        let mut handles = std::mem::take(&mut *self.lock_workers());
        if handles.is_empty() {
            return;
        }

        tracing::info!(
            fresh = self.queue.fresh_depth(),
            paused = self.queue.paused_depth(),
            grace_secs = grace.as_secs(),
            "Draining multiplexer"
        );

        if tokio::time::timeout(grace, join_all(handles.iter_mut())).await.is_err() {
            tracing::warn!("Shutdown grace elapsed, aborting workers");
            for handle in &handles {
                handle.abort();
            }
            for handle in handles {
                let _ = handle.await;
            }
        }

        let failed = self.queue.abandon();
        if failed > 0 {
            tracing::warn!(failed, "Requests failed by shutdown");
        }
        tracing::info!("Multiplexer stopped");
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Entries waiting as `(fresh, paused)`.
    pub fn queue_depth(&self) -> (usize, usize) {
        (self.queue.fresh_depth(), self.queue.paused_depth())
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        for handle in self.lock_workers().iter() {
            handle.abort();
        }
    }
}
