use crate::config::{OverflowPolicy, QueueConfig};
use crate::diagnostics::DeliverySink;
use crate::logger::record::LogRecord;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of handing one record to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueResult {
    Accepted,
    /// Accepted after evicting the oldest queued record.
    DroppedOldest,
    /// Not queued: the queue is full under the block policy, or closed.
    Rejected,
}

/// Bounded multi-producer queue feeding the batcher.
///
/// Producers never coordinate with each other; all synchronization is the short
/// critical section around the deque. The batcher is the only consumer.
pub struct ShipmentQueue {
    state: Mutex<QueueState>,
    records_available: Notify,
    space_available: Notify,
    sink: Arc<DeliverySink>,
}

struct QueueState {
    records: VecDeque<LogRecord>,
    capacity: usize,
    overflow: OverflowPolicy,
    block_timeout: Duration,
    closed: bool,
}

impl ShipmentQueue {
    pub fn new(config: &QueueConfig, sink: Arc<DeliverySink>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                records: VecDeque::with_capacity(config.capacity.min(4096)),
                capacity: config.capacity.max(1),
                overflow: config.overflow,
                block_timeout: config.block_timeout,
                closed: false,
            }),
            records_available: Notify::new(),
            space_available: Notify::new(),
            sink,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panicking producer cannot leave the deque half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue without waiting. Under the block policy a full queue rejects at once.
    pub fn try_enqueue(&self, record: LogRecord) -> EnqueueResult {
        match self.push(record) {
            Ok(result) => result,
            Err(_) => {
                self.sink.record_rejected();
                EnqueueResult::Rejected
            }
        }
    }

    /// Enqueue, waiting up to the configured `block_timeout` for space under the block
    /// policy. Never waits under drop-oldest.
    pub async fn enqueue(&self, record: LogRecord) -> EnqueueResult {
        let mut record = record;
        // Set on the first full-queue miss, which only happens under the block policy
        let mut deadline: Option<Option<Instant>> = None;

        loop {
            // Register interest before checking, so a drain between the check and the
            // wait is not missed
            let space = self.space_available.notified();

            match self.push(record) {
                Ok(result) => return result,
                Err(returned) => record = returned,
            }

            if self.is_closed() {
                return self.reject(&record);
            }

            match *deadline.get_or_insert_with(|| self.block_deadline()) {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, space).await.is_err() {
                        return self.reject(&record);
                    }
                }
                // Timeout too large to represent: wait for space or close
                None => space.await,
            }
        }
    }

    fn block_deadline(&self) -> Option<Instant> {
        let block_timeout = self.lock().block_timeout;
        Instant::now().checked_add(block_timeout)
    }

    fn reject(&self, record: &LogRecord) -> EnqueueResult {
        debug!(sequence = record.sequence, "Shipment queue full, record rejected");
        self.sink.record_rejected();
        EnqueueResult::Rejected
    }

    /// Returns the record back when it could not be admitted.
    fn push(&self, record: LogRecord) -> Result<EnqueueResult, LogRecord> {
        let mut state = self.lock();

        if state.closed {
            return Err(record);
        }

        let result = if state.records.len() < state.capacity {
            state.records.push_back(record);
            EnqueueResult::Accepted
        } else {
            match state.overflow {
                OverflowPolicy::Block => return Err(record),
                OverflowPolicy::DropOldest => {
                    state.records.pop_front();
                    state.records.push_back(record);
                    self.sink.record_evicted(1);
                    EnqueueResult::DroppedOldest
                }
            }
        };
        drop(state);

        self.records_available.notify_one();
        Ok(result)
    }

    /// Remove up to `max` records in insertion order.
    pub fn drain(&self, max: usize) -> Vec<LogRecord> {
        let mut state = self.lock();
        let n = max.min(state.records.len());
        let drained: Vec<LogRecord> = state.records.drain(..n).collect();
        drop(state);

        if !drained.is_empty() {
            self.space_available.notify_waiters();
        }
        drained
    }

    /// Wait until a producer signals a new record or the queue is closed. May return
    /// spuriously; callers re-check with [`ShipmentQueue::drain`].
    pub async fn records_available(&self) {
        self.records_available.notified().await;
    }

    /// Stop accepting records. Already queued records stay drainable.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);

        self.records_available.notify_one();
        self.space_available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Closed and nothing left to drain.
    pub fn is_finished(&self) -> bool {
        let state = self.lock();
        state.closed && state.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Sequence numbers currently queued, oldest first.
    pub fn queued_sequences(&self) -> Vec<u64> {
        self.lock().records.iter().map(|r| r.sequence).collect()
    }

    /// Apply new capacity and overflow settings. Shrinking below the current occupancy
    /// evicts the oldest records so occupancy never exceeds capacity.
    pub fn reconfigure(&self, config: &QueueConfig) {
        let mut state = self.lock();
        state.capacity = config.capacity.max(1);
        state.overflow = config.overflow;
        state.block_timeout = config.block_timeout;

        let excess = state.records.len().saturating_sub(state.capacity);
        if excess > 0 {
            state.records.drain(..excess);
            warn!(
                evicted = excess,
                capacity = state.capacity,
                "Queue capacity reduced, evicted oldest records"
            );
            self.sink.record_evicted(excess as u64);
        }
        drop(state);

        self.space_available.notify_waiters();
    }
}
