use crate::config::Config;
use crate::diagnostics::{DeliveryOutcome, DeliverySink, DeliveryStatus, DropReason};
use crate::pipeline::batch::Batch;
use crate::transport::backoff::backoff_delay;
use crate::transport::circuit_breaker::{Admission, CircuitBreaker};
use crate::transport::client::{IngestClient, IngestError};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Handoff channel shared by every worker. Whichever worker holds the lock claims the
/// next batch, so each batch goes to exactly one worker.
pub type SharedBatchReceiver = Arc<Mutex<mpsc::Receiver<Batch>>>;

/// One delivery worker with its own circuit breaker.
pub struct TransportWorker {
    id: usize,
    client: Arc<dyn IngestClient>,
    breaker: CircuitBreaker,
    sink: Arc<DeliverySink>,
    config_rx: watch::Receiver<Arc<Config>>,
}

enum AttemptFailure {
    Retryable(IngestError),
    Permanent(IngestError),
}

impl TransportWorker {
    pub fn new(
        id: usize,
        client: Arc<dyn IngestClient>,
        sink: Arc<DeliverySink>,
        mut config_rx: watch::Receiver<Arc<Config>>,
    ) -> Self {
        let breaker = CircuitBreaker::new(&config_rx.borrow_and_update().circuit_breaker);
        Self {
            id,
            client,
            breaker,
            sink,
            config_rx,
        }
    }

    /// Claim and deliver batches until the handoff channel is closed and empty.
    pub async fn run(mut self, input: SharedBatchReceiver) {
        debug!(worker_id = self.id, "Transport worker started");

        loop {
            let batch = {
                let mut rx = input.lock().await;
                rx.recv().await
            };
            let Some(batch) = batch else { break };
            self.process(batch).await;
        }

        debug!(worker_id = self.id, "Transport worker stopped");
    }

    /// Deliver one batch and report its outcome to the sink.
    pub async fn process(&mut self, batch: Batch) -> DeliveryOutcome {
        if self.config_rx.has_changed().unwrap_or(false) {
            let config = Arc::clone(&self.config_rx.borrow_and_update());
            self.breaker.reconfigure(&config.circuit_breaker);
        }

        let (status, reason, attempts, last_error) = match self.breaker.admit(Instant::now()) {
            Admission::Reject => {
                debug!(
                    worker_id = self.id,
                    batch_id = %batch.batch_id,
                    records = batch.len(),
                    "Circuit open, dropping batch"
                );
                (
                    DeliveryStatus::Dropped,
                    Some(DropReason::CircuitOpen),
                    0,
                    Some("circuit open".to_string()),
                )
            }
            Admission::Trial => match self.attempt(&batch).await {
                Ok(()) => {
                    self.breaker.record_success();
                    (DeliveryStatus::Delivered, None, 1, None)
                }
                Err(failure) => {
                    self.breaker.record_failure(Instant::now());
                    let (reason, err) = match failure {
                        AttemptFailure::Permanent(e) => (DropReason::Rejected, e),
                        AttemptFailure::Retryable(e) => (DropReason::RetriesExhausted, e),
                    };
                    warn!(worker_id = self.id, batch_id = %batch.batch_id, error = %err, "Recovery trial failed");
                    (DeliveryStatus::Dropped, Some(reason), 1, Some(err.to_string()))
                }
            },
            Admission::Proceed => self.deliver_with_retry(&batch).await,
        };

        self.sink
            .update_worker_circuit(self.id, self.breaker.state(), self.breaker.consecutive_failures());

        let outcome = DeliveryOutcome {
            batch_id: batch.batch_id,
            worker_id: self.id,
            record_count: batch.len(),
            attempt_count: attempts,
            final_status: status,
            drop_reason: reason,
            last_error,
            finished_at: Utc::now(),
        };
        self.sink.record_outcome(outcome.clone());
        outcome
    }

    async fn deliver_with_retry(
        &mut self,
        batch: &Batch,
    ) -> (DeliveryStatus, Option<DropReason>, u32, Option<String>) {
        let retry = &batch.settings.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(batch).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(worker_id = self.id, batch_id = %batch.batch_id, attempt, "Batch delivered after retry");
                    }
                    self.breaker.record_success();
                    return (DeliveryStatus::Delivered, None, attempt, None);
                }
                Err(AttemptFailure::Permanent(e)) => {
                    warn!(
                        worker_id = self.id,
                        batch_id = %batch.batch_id,
                        first_sequence = ?batch.first_sequence(),
                        last_sequence = ?batch.last_sequence(),
                        error = %e,
                        "Endpoint rejected batch, not retrying"
                    );
                    self.breaker.record_failure(Instant::now());
                    return (
                        DeliveryStatus::Dropped,
                        Some(DropReason::Rejected),
                        attempt,
                        Some(e.to_string()),
                    );
                }
                Err(AttemptFailure::Retryable(e)) if attempt >= max_attempts => {
                    warn!(
                        worker_id = self.id,
                        batch_id = %batch.batch_id,
                        first_sequence = ?batch.first_sequence(),
                        last_sequence = ?batch.last_sequence(),
                        attempts = attempt,
                        error = %e,
                        "Batch dropped after exhausting retries"
                    );
                    self.breaker.record_failure(Instant::now());
                    return (
                        DeliveryStatus::Dropped,
                        Some(DropReason::RetriesExhausted),
                        attempt,
                        Some(e.to_string()),
                    );
                }
                Err(AttemptFailure::Retryable(e)) => {
                    let delay = backoff_delay(attempt, retry.base_delay, retry.max_delay, retry.jitter);
                    warn!(
                        worker_id = self.id,
                        batch_id = %batch.batch_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Delivery attempt failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One call to the endpoint under the batch's call timeout. A panicking client
    /// counts as a transient failure instead of taking the worker down.
    async fn attempt(&self, batch: &Batch) -> Result<(), AttemptFailure> {
        self.sink.record_attempt();
        let call_timeout = batch.settings.call_timeout;

        let call = AssertUnwindSafe(self.client.ship(batch, call_timeout)).catch_unwind();
        let result = match tokio::time::timeout(call_timeout, call).await {
            Err(_) => Err(IngestError::Timeout(call_timeout)),
            Ok(Err(_panic)) => Err(IngestError::Other("ingest client panicked".to_string())),
            Ok(Ok(result)) => result,
        };

        result.map_err(|e| {
            if e.is_retryable() {
                AttemptFailure::Retryable(e)
            } else {
                AttemptFailure::Permanent(e)
            }
        })
    }
}
