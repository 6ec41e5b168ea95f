//! Shared work queue: a fresh FIFO and a paused FIFO.
//!
//! Paused entries (requests whose connection died mid-flight) are always
//! handed out before fresh ones. These two queues are the only state shared
//! between workers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::mux::error::RelayError;
use crate::mux::types::{RequestDescriptor, ResultRecord};
use crate::observability::metrics;

/// What the submitter eventually receives.
pub type Outcome = Result<ResultRecord, RelayError>;

/// Single-fire completion signal for one request.
#[derive(Debug)]
pub struct Completion(oneshot::Sender<Outcome>);

impl Completion {
    /// Deliver the outcome. Returns false if the submitter is gone.
    pub fn fire(self, outcome: Outcome) -> bool {
        self.0.send(outcome).is_ok()
    }

    /// True once the submitter has stopped waiting.
    pub fn is_abandoned(&self) -> bool {
        self.0.is_closed()
    }
}

/// A request plus its completion signal.
///
/// The entry is moved, never copied, between queues, so a paused request
/// keeps its identity and its caller's completion.
#[derive(Debug)]
pub struct QueueEntry {
    pub descriptor: RequestDescriptor,
    pub completion: Completion,
    /// How many times a dying connection has paused this request.
    pub pauses: u32,
    submitted_at: Instant,
}

impl QueueEntry {
    pub fn new(descriptor: RequestDescriptor) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let entry = Self {
            descriptor,
            completion: Completion(tx),
            pauses: 0,
            submitted_at: Instant::now(),
        };
        (entry, rx)
    }

    /// Fire the completion, consuming the entry.
    pub fn complete(self, outcome: Outcome) {
        let label = match &outcome {
            Ok(record) => record.status.to_string(),
            Err(e) => e.kind().to_string(),
        };
        metrics::record_request(self.descriptor.method.as_str(), label, self.submitted_at);

        if !self.completion.fire(outcome) {
            tracing::debug!(request_id = %self.descriptor.id, "Submitter went away before completion");
        }
    }
}

#[derive(Debug)]
pub struct WorkQueue {
    fresh_tx: Mutex<Option<mpsc::UnboundedSender<QueueEntry>>>,
    fresh_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueueEntry>>,
    paused: Mutex<VecDeque<QueueEntry>>,
    paused_ready: Notify,
    fresh_depth: AtomicUsize,
    closed: AtomicBool,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            fresh_tx: Mutex::new(Some(tx)),
            fresh_rx: tokio::sync::Mutex::new(rx),
            paused: Mutex::new(VecDeque::new()),
            paused_ready: Notify::new(),
            fresh_depth: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a newly submitted request. Hands the entry back once closed.
    pub fn push(&self, entry: QueueEntry) -> Result<(), QueueEntry> {
        let guard = lock(&self.fresh_tx);
        let Some(tx) = guard.as_ref() else {
            return Err(entry);
        };
        self.fresh_depth.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(entry)) = tx.send(entry) {
            self.fresh_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(entry);
        }
        drop(guard);
        self.report_depth();
        Ok(())
    }

    /// Park a request whose connection died; it is served before any fresh one.
    pub fn pause(&self, mut entry: QueueEntry) {
        entry.pauses += 1;
        tracing::info!(
            request_id = %entry.descriptor.id,
            pauses = entry.pauses,
            "Request paused until a connection is available"
        );
        lock(&self.paused).push_back(entry);
        metrics::record_paused();
        self.paused_ready.notify_one();
        self.report_depth();
    }

    /// Next entry, paused first. Returns `None` once closed and drained.
    pub async fn next(&self) -> Option<QueueEntry> {
        loop {
            if let Some(entry) = self.pop_paused() {
                return Some(entry);
            }

            let mut fresh = self.fresh_rx.lock().await;
            // A paused entry may have arrived while waiting for the lock.
            if let Some(entry) = self.pop_paused() {
                return Some(entry);
            }

            tokio::select! {
                biased;
                _ = self.paused_ready.notified() => continue,
                entry = fresh.recv() => {
                    if entry.is_some() {
                        self.fresh_depth.fetch_sub(1, Ordering::SeqCst);
                        self.report_depth();
                    }
                    return entry;
                }
            }
        }
    }

    /// Stop accepting fresh requests. Queued entries are still handed out.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.fresh_tx).take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closed with nothing left to hand out.
    pub fn is_drained(&self) -> bool {
        self.is_closed() && self.fresh_depth() == 0 && self.paused_depth() == 0
    }

    pub fn fresh_depth(&self) -> usize {
        self.fresh_depth.load(Ordering::SeqCst)
    }

    pub fn paused_depth(&self) -> usize {
        lock(&self.paused).len()
    }

    /// Fail every entry still queued with `Stopped`. Used after workers have
    /// been aborted; returns the number of entries failed.
    pub fn abandon(&self) -> usize {
        let mut failed = 0;
        let paused: Vec<QueueEntry> = lock(&self.paused).drain(..).collect();
        for entry in paused {
            entry.complete(Err(RelayError::Stopped));
            failed += 1;
        }
        if let Ok(mut fresh) = self.fresh_rx.try_lock() {
            while let Ok(entry) = fresh.try_recv() {
                self.fresh_depth.fetch_sub(1, Ordering::SeqCst);
                entry.complete(Err(RelayError::Stopped));
                failed += 1;
            }
        }
        self.report_depth();
        failed
    }

    fn pop_paused(&self) -> Option<QueueEntry> {
        let entry = lock(&self.paused).pop_front();
        if entry.is_some() {
            self.report_depth();
        }
        entry
    }

    fn report_depth(&self) {
        metrics::record_queue_depth(self.fresh_depth(), self.paused_depth());
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
