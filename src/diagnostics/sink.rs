use crate::transport::circuit_breaker::CircuitState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Number of most recent outcomes kept for diagnostics.
pub const RECENT_OUTCOMES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Every allowed attempt failed with a transient error.
    RetriesExhausted,
    /// The worker's circuit was open; no call was made.
    CircuitOpen,
    /// The endpoint refused the payload permanently (non-retryable 4xx).
    Rejected,
}

/// Final result for one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    pub batch_id: Uuid,
    pub worker_id: usize,
    pub record_count: usize,
    pub attempt_count: u32,
    pub final_status: DeliveryStatus,
    pub drop_reason: Option<DropReason>,
    pub last_error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub worker_id: usize,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub batches_handled: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl WorkerStatus {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            circuit_state: CircuitState::Closed,
            consecutive_failures: 0,
            batches_handled: 0,
            last_error: None,
            last_error_at: None,
        }
    }
}

/// Read-only view handed to diagnostics consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SinkSnapshot {
    pub delivered_batches: u64,
    pub delivered_records: u64,
    pub dropped_batches: u64,
    pub dropped_records: u64,
    pub dropped_retries_exhausted: u64,
    pub dropped_circuit_open: u64,
    pub dropped_rejected: u64,
    pub delivery_attempts: u64,
    pub records_evicted: u64,
    pub records_rejected: u64,
    pub queue_depth: usize,
    pub workers: Vec<WorkerStatus>,
    pub recent_outcomes: Vec<DeliveryOutcome>,
}

/// Passive accumulator of delivery results. Written by every worker and the queue,
/// read by diagnostics callers; counters are atomics, per-worker state is locked.
#[derive(Default)]
pub struct DeliverySink {
    delivered_batches: AtomicU64,
    delivered_records: AtomicU64,
    dropped_batches: AtomicU64,
    dropped_records: AtomicU64,
    dropped_retries_exhausted: AtomicU64,
    dropped_circuit_open: AtomicU64,
    dropped_rejected: AtomicU64,
    delivery_attempts: AtomicU64,
    records_evicted: AtomicU64,
    records_rejected: AtomicU64,
    workers: Mutex<BTreeMap<usize, WorkerStatus>>,
    recent: Mutex<VecDeque<DeliveryOutcome>>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl DeliverySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, outcome: DeliveryOutcome) {
        let records = outcome.record_count as u64;
        match outcome.final_status {
            DeliveryStatus::Delivered => {
                self.delivered_batches.fetch_add(1, Ordering::Relaxed);
                self.delivered_records.fetch_add(records, Ordering::Relaxed);
            }
            DeliveryStatus::Dropped => {
                self.dropped_batches.fetch_add(1, Ordering::Relaxed);
                self.dropped_records.fetch_add(records, Ordering::Relaxed);
                let by_reason = match outcome.drop_reason {
                    Some(DropReason::CircuitOpen) => &self.dropped_circuit_open,
                    Some(DropReason::Rejected) => &self.dropped_rejected,
                    Some(DropReason::RetriesExhausted) | None => &self.dropped_retries_exhausted,
                };
                by_reason.fetch_add(1, Ordering::Relaxed);
            }
        }

        {
            let mut workers = relock(&self.workers);
            let status = workers
                .entry(outcome.worker_id)
                .or_insert_with(|| WorkerStatus::new(outcome.worker_id));
            status.batches_handled += 1;
            if let Some(err) = &outcome.last_error {
                status.last_error = Some(err.clone());
                status.last_error_at = Some(outcome.finished_at);
            }
        }

        let mut recent = relock(&self.recent);
        if recent.len() == RECENT_OUTCOMES {
            recent.pop_front();
        }
        recent.push_back(outcome);
    }

    /// One network call was made.
    pub fn record_attempt(&self) {
        self.delivery_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Mirror a worker's breaker state for diagnostics.
    pub fn update_worker_circuit(
        &self,
        worker_id: usize,
        circuit_state: CircuitState,
        consecutive_failures: u32,
    ) {
        let mut workers = relock(&self.workers);
        let status = workers
            .entry(worker_id)
            .or_insert_with(|| WorkerStatus::new(worker_id));
        status.circuit_state = circuit_state;
        status.consecutive_failures = consecutive_failures;
    }

    pub fn record_evicted(&self, count: u64) {
        self.records_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered_batches(&self) -> u64 {
        self.delivered_batches.load(Ordering::Relaxed)
    }

    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SinkSnapshot {
        SinkSnapshot {
            delivered_batches: self.delivered_batches.load(Ordering::Relaxed),
            delivered_records: self.delivered_records.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
            dropped_retries_exhausted: self.dropped_retries_exhausted.load(Ordering::Relaxed),
            dropped_circuit_open: self.dropped_circuit_open.load(Ordering::Relaxed),
            dropped_rejected: self.dropped_rejected.load(Ordering::Relaxed),
            delivery_attempts: self.delivery_attempts.load(Ordering::Relaxed),
            records_evicted: self.records_evicted.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            queue_depth: 0,
            workers: relock(&self.workers).values().cloned().collect(),
            recent_outcomes: relock(&self.recent).iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn outcome(worker_id: usize, status: DeliveryStatus, reason: Option<DropReason>) -> DeliveryOutcome {
        DeliveryOutcome {
            batch_id: Uuid::new_v4(),
            worker_id,
            record_count: 10,
            attempt_count: 1,
            final_status: status,
            drop_reason: reason,
            last_error: reason.map(|r| format!("{:?}", r)),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_counts_by_status_and_reason() {
        let sink = DeliverySink::new();
        sink.record_outcome(outcome(0, DeliveryStatus::Delivered, None));
        sink.record_outcome(outcome(0, DeliveryStatus::Delivered, None));
        sink.record_outcome(outcome(1, DeliveryStatus::Dropped, Some(DropReason::CircuitOpen)));
        sink.record_outcome(outcome(1, DeliveryStatus::Dropped, Some(DropReason::RetriesExhausted)));
        sink.record_outcome(outcome(1, DeliveryStatus::Dropped, Some(DropReason::Rejected)));

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.delivered_batches, 2);
        assert_eq!(snapshot.delivered_records, 20);
        assert_eq!(snapshot.dropped_batches, 3);
        assert_eq!(snapshot.dropped_records, 30);
        assert_eq!(snapshot.dropped_circuit_open, 1);
        assert_eq!(snapshot.dropped_retries_exhausted, 1);
        assert_eq!(snapshot.dropped_rejected, 1);
        assert_eq!(snapshot.workers.len(), 2);
        assert_eq!(snapshot.workers[1].batches_handled, 3);
        assert_eq!(snapshot.workers[1].last_error.as_deref(), Some("Rejected"));
        assert!(snapshot.workers[0].last_error.is_none());
    }

    #[test]
    fn test_recent_outcomes_are_bounded() {
        let sink = DeliverySink::new();
        for _ in 0..(RECENT_OUTCOMES + 20) {
            sink.record_outcome(outcome(0, DeliveryStatus::Delivered, None));
        }
        let snapshot = sink.snapshot();
        assert_eq!(snapshot.recent_outcomes.len(), RECENT_OUTCOMES);
        assert_eq!(snapshot.delivered_batches, (RECENT_OUTCOMES + 20) as u64);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let sink = Arc::new(DeliverySink::new());
        let writers: Vec<_> = (0..4)
            .map(|worker_id| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        sink.record_attempt();
                        sink.record_outcome(outcome(worker_id, DeliveryStatus::Delivered, None));
                        sink.update_worker_circuit(worker_id, CircuitState::Closed, 0);
                    }
                })
            })
            .collect();
        let reader = {
            let sink = Arc::clone(&sink);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let snapshot = sink.snapshot();
                    assert!(snapshot.delivered_batches <= 1000);
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.delivered_batches, 1000);
        assert_eq!(snapshot.delivery_attempts, 1000);
        assert_eq!(snapshot.workers.iter().map(|w| w.batches_handled).sum::<u64>(), 1000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let sink = DeliverySink::new();
        sink.update_worker_circuit(3, CircuitState::Open, 5);
        let json = serde_json::to_value(sink.snapshot()).unwrap();
        assert_eq!(json["workers"][0]["circuit_state"], "open");
        assert_eq!(json["workers"][0]["consecutive_failures"], 5);
    }
}
