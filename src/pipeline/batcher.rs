use crate::config::{BatchConfig, Config};
use crate::logger::record::LogRecord;
use crate::pipeline::batch::{Batch, DeliverySettings};
use crate::pipeline::queue::ShipmentQueue;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Turns the record stream into batches closed by size, byte ceiling, or age.
pub struct BatchAccumulator {
    limits: BatchConfig,
    settings: Arc<DeliverySettings>,
    current: Option<OpenBatch>,
}

/// A batch being filled. Keeps the limits in force when it was opened.
struct OpenBatch {
    records: Vec<LogRecord>,
    bytes: usize,
    opened_at: Instant,
    created_at: DateTime<Utc>,
    limits: BatchConfig,
    settings: Arc<DeliverySettings>,
}

impl OpenBatch {
    fn is_full(&self) -> bool {
        self.records.len() >= self.limits.max_records || self.bytes >= self.limits.max_bytes
    }

    /// `None` when `max_wait` reaches past what the clock can represent.
    fn deadline(&self) -> Option<Instant> {
        self.opened_at.checked_add(self.limits.max_wait)
    }

    fn into_batch(self) -> Batch {
        Batch {
            batch_id: Uuid::new_v4(),
            records: self.records,
            created_at: self.created_at,
            byte_size_estimate: self.bytes,
            settings: self.settings,
        }
    }
}

impl BatchAccumulator {
    pub fn new(limits: BatchConfig, settings: DeliverySettings) -> Self {
        Self {
            limits,
            settings: Arc::new(settings),
            current: None,
        }
    }

    /// New limits and settings apply from the next batch opened.
    pub fn reconfigure(&mut self, limits: BatchConfig, settings: DeliverySettings) {
        self.limits = limits;
        self.settings = Arc::new(settings);
    }

    /// Add a record. Returns the batches this closed, oldest first (usually none).
    pub fn push(&mut self, record: LogRecord) -> Vec<Batch> {
        let mut closed = Vec::new();
        let size = record.estimated_size();

        // Close the open batch first if this record would push it past the byte ceiling
        if let Some(open) = &self.current {
            if !open.records.is_empty() && open.bytes + size > open.limits.max_bytes {
                if let Some(open) = self.current.take() {
                    closed.push(open.into_batch());
                }
            }
        }

        let open = self.current.get_or_insert_with(|| OpenBatch {
            records: Vec::with_capacity(self.limits.max_records.min(1024)),
            bytes: 0,
            opened_at: Instant::now(),
            created_at: Utc::now(),
            limits: self.limits.clone(),
            settings: Arc::clone(&self.settings),
        });
        open.records.push(record);
        open.bytes += size;

        if open.is_full() {
            if let Some(open) = self.current.take() {
                closed.push(open.into_batch());
            }
        }

        closed
    }

    /// Close the open batch regardless of triggers. `None` when nothing is pending.
    pub fn flush(&mut self) -> Option<Batch> {
        self.current.take().map(OpenBatch::into_batch)
    }

    /// When the open batch's time trigger fires. `None` with no open batch, or when the
    /// time trigger can never fire.
    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().and_then(OpenBatch::deadline)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().map_or(false, |deadline| now >= deadline)
    }

    /// Records that fit before the size trigger fires.
    pub fn remaining_capacity(&self) -> usize {
        match &self.current {
            Some(open) => open.limits.max_records.saturating_sub(open.records.len()).max(1),
            None => self.limits.max_records.max(1),
        }
    }

    pub fn pending(&self) -> usize {
        self.current.as_ref().map_or(0, |open| open.records.len())
    }
}

/// Drain loop. Runs until the queue is closed and empty, then flushes the partial batch
/// and drops `output`, which lets the workers finish.
///
/// While `output` is full the loop stops draining, so a slow worker pool fills the
/// shipment queue and its overflow policy takes over.
pub async fn run_batcher(
    queue: Arc<ShipmentQueue>,
    output: mpsc::Sender<Batch>,
    mut config_rx: watch::Receiver<Arc<Config>>,
) {
    let mut accumulator = {
        let config = config_rx.borrow_and_update();
        BatchAccumulator::new(config.batch.clone(), DeliverySettings::from_config(&config))
    };

    info!("Batcher started");

    loop {
        if config_rx.has_changed().unwrap_or(false) {
            let config = Arc::clone(&config_rx.borrow_and_update());
            accumulator.reconfigure(config.batch.clone(), DeliverySettings::from_config(&config));
            debug!(
                max_records = config.batch.max_records,
                max_wait_ms = config.batch.max_wait.as_millis() as u64,
                "Batcher picked up new batch settings"
            );
        }

        if accumulator.is_expired(Instant::now()) {
            if let Some(batch) = accumulator.flush() {
                debug!(batch_id = %batch.batch_id, records = batch.len(), "Batch closed on timeout");
                if !hand_off(&output, batch).await {
                    return;
                }
            }
        }

        let records = queue.drain(accumulator.remaining_capacity());
        if records.is_empty() {
            if queue.is_finished() {
                break;
            }
            match accumulator.deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = queue.records_available() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => queue.records_available().await,
            }
            continue;
        }

        for record in records {
            for batch in accumulator.push(record) {
                debug!(batch_id = %batch.batch_id, records = batch.len(), "Batch closed on size");
                if !hand_off(&output, batch).await {
                    return;
                }
            }
        }
    }

    // Best-effort final drain
    if let Some(batch) = accumulator.flush() {
        info!(batch_id = %batch.batch_id, records = batch.len(), "Final batch flush");
        hand_off(&output, batch).await;
    }

    info!("Batcher shutdown complete");
}

/// Blocks while every worker is busy. Returns false once no worker is left to receive.
async fn hand_off(output: &mpsc::Sender<Batch>, batch: Batch) -> bool {
    match output.send(batch).await {
        Ok(()) => true,
        Err(mpsc::error::SendError(batch)) => {
            error!(
                batch_id = %batch.batch_id,
                records = batch.len(),
                "Worker pool gone, batch lost"
            );
            false
        }
    }
}
