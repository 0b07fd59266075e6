use async_trait::async_trait;
use logship::config::{Config, OverflowPolicy};
use logship::diagnostics::{DeliveryStatus, DropReason};
use logship::logger::build_record;
use logship::pipeline::Batch;
use logship::transport::{CircuitState, IngestClient, IngestError};
use logship::{EnqueueResult, Level, Pipeline};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const NO_FIELDS: [(&str, &str); 0] = [];

/// Records every shipped batch as its list of sequence numbers.
#[derive(Default)]
struct RecordingClient {
    batches: Mutex<Vec<Vec<u64>>>,
}

#[async_trait]
impl IngestClient for RecordingClient {
    async fn ship(&self, batch: &Batch, _timeout: Duration) -> Result<(), IngestError> {
        let sequences = batch.records.iter().map(|r| r.sequence).collect();
        self.batches.lock().unwrap().push(sequences);
        Ok(())
    }
}

/// Never answers. The worker's call timeout is the only way out.
#[derive(Default)]
struct HangingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl IngestClient for HangingClient {
    async fn ship(&self, _batch: &Batch, _timeout: Duration) -> Result<(), IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[derive(Default)]
struct FailingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl IngestClient for FailingClient {
    async fn ship(&self, _batch: &Batch, _timeout: Duration) -> Result<(), IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(IngestError::Status {
            status: 503,
            message: "unavailable".to_string(),
        })
    }
}

fn base_config() -> Config {
    let mut config = Config::default();
    config.logger.console = false;
    config.retry.base_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.retry.jitter = false;
    config
}

async fn enqueue_n(pipeline: &Pipeline, n: usize) -> Vec<u64> {
    let mut sequences = Vec::with_capacity(n);
    for i in 0..n {
        let record = build_record(None, "it", Level::Info, format!("record {}", i), NO_FIELDS);
        sequences.push(record.sequence);
        assert_eq!(pipeline.enqueue(record).await, EnqueueResult::Accepted);
    }
    sequences
}

#[tokio::test]
async fn test_size_trigger_splits_250_records_into_100_100_50() {
    let mut config = base_config();
    config.batch.max_records = 100;
    config.batch.max_wait = Duration::from_secs(30);

    let client = Arc::new(RecordingClient::default());
    let pipeline = Pipeline::start(config, client.clone()).unwrap();

    let expected = enqueue_n(&pipeline, 250).await;
    pipeline.shutdown().await;

    let mut batches = client.batches.lock().unwrap().clone();
    batches.sort_by_key(|b| b[0]);
    let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(batches.concat(), expected);

    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.delivered_batches, 3);
    assert_eq!(snapshot.delivered_records, 250);
    assert_eq!(snapshot.dropped_batches, 0);
}

#[tokio::test]
async fn test_time_trigger_ships_partial_batch() {
    let mut config = base_config();
    config.batch.max_records = 100;
    config.batch.max_wait = Duration::from_millis(100);

    let client = Arc::new(RecordingClient::default());
    let pipeline = Pipeline::start(config, client.clone()).unwrap();

    enqueue_n(&pipeline, 7).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(client.batches.lock().unwrap().len(), 1);
    assert_eq!(client.batches.lock().unwrap()[0].len(), 7);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_always_timing_out_endpoint_drops_batch_after_all_attempts() {
    let mut config = base_config();
    config.retry.max_attempts = 3;
    config.endpoint.timeout = Duration::from_millis(50);
    config.batch.max_wait = Duration::from_millis(20);
    config.workers.count = 1;

    let client = Arc::new(HangingClient::default());
    let pipeline = Pipeline::start(config, client.clone()).unwrap();

    enqueue_n(&pipeline, 10).await;
    pipeline.shutdown().await;

    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.dropped_batches, 1);
    assert_eq!(snapshot.dropped_records, 10);
    assert_eq!(snapshot.dropped_retries_exhausted, 1);
    assert_eq!(snapshot.delivery_attempts, 3);
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);

    let outcome = &snapshot.recent_outcomes[0];
    assert_eq!(outcome.final_status, DeliveryStatus::Dropped);
    assert_eq!(outcome.attempt_count, 3);
    assert!(outcome.last_error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_open_circuit_drops_without_calling_endpoint() {
    let mut config = base_config();
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.recovery_timeout = Duration::from_secs(60);
    config.batch.max_records = 1;
    config.workers.count = 1;

    let client = Arc::new(FailingClient::default());
    let pipeline = Pipeline::start(config, client.clone()).unwrap();

    enqueue_n(&pipeline, 5).await;
    pipeline.shutdown().await;

    let snapshot = pipeline.snapshot();
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    assert_eq!(snapshot.dropped_batches, 5);
    assert_eq!(snapshot.dropped_retries_exhausted, 2);
    assert_eq!(snapshot.dropped_circuit_open, 3);
    assert_eq!(snapshot.workers[0].circuit_state, CircuitState::Open);

    let open_drops: Vec<_> = snapshot
        .recent_outcomes
        .iter()
        .filter(|o| o.drop_reason == Some(DropReason::CircuitOpen))
        .collect();
    assert!(open_drops.iter().all(|o| o.attempt_count == 0));
}

#[tokio::test]
async fn test_every_enqueued_record_has_one_outcome() {
    let mut config = base_config();
    config.batch.max_records = 7;
    config.batch.max_wait = Duration::from_millis(10);
    config.workers.count = 3;

    let client = Arc::new(RecordingClient::default());
    let pipeline = Arc::new(Pipeline::start(config, client.clone()).unwrap());

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { enqueue_n(&pipeline, 100).await })
        })
        .collect();

    let mut expected = Vec::new();
    for producer in producers {
        expected.extend(producer.await.unwrap());
    }
    pipeline.shutdown().await;

    let mut delivered = client.batches.lock().unwrap().concat();
    delivered.sort_unstable();
    expected.sort_unstable();
    assert_eq!(delivered, expected);

    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.delivered_records + snapshot.dropped_records, 400);
    assert_eq!(snapshot.queue_depth, 0);
}

#[tokio::test]
async fn test_drop_oldest_under_saturation() {
    let mut config = base_config();
    config.queue.capacity = 5;
    config.queue.overflow = OverflowPolicy::DropOldest;

    let client = Arc::new(RecordingClient::default());
    let pipeline = Pipeline::start(config, client).unwrap();

    // No await between enqueues, so the batcher cannot drain in between on this runtime
    let records: Vec<_> = (1..=8)
        .map(|i| build_record(None, "it", Level::Info, format!("r{}", i), NO_FIELDS))
        .collect();
    let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
    let results: Vec<_> = records.into_iter().map(|r| pipeline.try_enqueue(r)).collect();

    assert_eq!(results.iter().filter(|r| **r == EnqueueResult::DroppedOldest).count(), 3);
    assert_eq!(pipeline.queue().queued_sequences(), sequences[3..].to_vec());
    assert_eq!(pipeline.snapshot().records_evicted, 3);

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_block_policy_backpressure_rejects_after_timeout() {
    let mut config = base_config();
    config.queue.capacity = 5;
    config.queue.overflow = OverflowPolicy::Block;
    config.queue.block_timeout = Duration::from_millis(50);
    config.batch.max_records = 1;
    config.workers.count = 1;
    config.workers.handoff_capacity = 1;
    config.workers.shutdown_grace = Duration::from_millis(100);
    config.endpoint.timeout = Duration::from_secs(60);

    let pipeline = Pipeline::start(config, Arc::new(HangingClient::default())).unwrap();

    // One batch in flight, one in the handoff channel, one held by the batcher
    enqueue_n(&pipeline, 3).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    enqueue_n(&pipeline, 5).await;
    let started = std::time::Instant::now();
    let late = build_record(None, "it", Level::Info, "late", NO_FIELDS);
    assert_eq!(pipeline.enqueue(late).await, EnqueueResult::Rejected);
    assert!(started.elapsed() >= Duration::from_millis(45));
    assert_eq!(pipeline.snapshot().records_rejected, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_twice_matches_single_shutdown() {
    let client = Arc::new(RecordingClient::default());
    let pipeline = Pipeline::start(base_config(), client.clone()).unwrap();
    enqueue_n(&pipeline, 12).await;

    pipeline.shutdown().await;
    let first = pipeline.snapshot();
    pipeline.shutdown().await;
    let second = pipeline.snapshot();

    assert_eq!(first, second);
    assert_eq!(first.delivered_records, 12);
    assert_eq!(client.batches.lock().unwrap().len(), 1);
}
