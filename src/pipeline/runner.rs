use crate::config::{validate_config, Config, ConfigError};
use crate::diagnostics::{DeliverySink, SinkSnapshot};
use crate::logger::file::RotatingFileWriter;
use crate::logger::record::LogRecord;
use crate::pipeline::batch::Batch;
use crate::pipeline::batcher::run_batcher;
use crate::pipeline::queue::{EnqueueResult, ShipmentQueue};
use crate::transport::client::{IngestClient, IngestError};
use crate::transport::worker::TransportWorker;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors that can occur while starting or controlling the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("transport setup failed: {0}")]
    Transport(#[from] IngestError),

    #[error("log shipment is already running")]
    AlreadyRunning,

    #[error("log shipment must be started from within a tokio runtime")]
    NoRuntime,

    #[error("cannot open log file: {0}")]
    FileOutput(std::io::Error),
}

struct PipelineTasks {
    batcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// A running shipment pipeline: queue, batcher and transport workers.
///
/// Dropping the pipeline closes the queue; the background tasks then drain and exit
/// on their own. Use [`Pipeline::shutdown`] to wait for them.
pub struct Pipeline {
    queue: Arc<ShipmentQueue>,
    sink: Arc<DeliverySink>,
    file_output: RotatingFileWriter,
    config_tx: watch::Sender<Arc<Config>>,
    tasks: Mutex<Option<PipelineTasks>>,
}

impl Pipeline {
    /// Validate `config` and spawn the batcher and worker tasks on the current runtime.
    /// Fails with [`PipelineError::NoRuntime`] when called outside one.
    pub fn start(config: Config, client: Arc<dyn IngestClient>) -> Result<Self, PipelineError> {
        let runtime = current_runtime()?;
        validate_config(&config)?;
        let file_output =
            RotatingFileWriter::open(&config.logger.file).map_err(PipelineError::FileOutput)?;

        let sink = Arc::new(DeliverySink::new());
        let queue = Arc::new(ShipmentQueue::new(&config.queue, Arc::clone(&sink)));
        let worker_count = config.workers.count;
        let (batch_tx, batch_rx) = mpsc::channel::<Batch>(config.workers.handoff_capacity.max(1));
        let (config_tx, config_rx) = watch::channel(Arc::new(config));

        let batcher = runtime.spawn(run_batcher(
            Arc::clone(&queue),
            batch_tx,
            config_rx.clone(),
        ));

        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let workers = (0..worker_count)
            .map(|id| {
                let worker = TransportWorker::new(
                    id,
                    Arc::clone(&client),
                    Arc::clone(&sink),
                    config_rx.clone(),
                );
                runtime.spawn(worker.run(Arc::clone(&batch_rx)))
            })
            .collect();

        info!(workers = worker_count, "Log shipment pipeline started");

        Ok(Self {
            queue,
            sink,
            file_output,
            config_tx,
            tasks: Mutex::new(Some(PipelineTasks { batcher, workers })),
        })
    }

    pub fn queue(&self) -> &Arc<ShipmentQueue> {
        &self.queue
    }

    pub fn sink(&self) -> &Arc<DeliverySink> {
        &self.sink
    }

    /// Local log file output shared by every logger on this pipeline.
    pub fn file_output(&self) -> &RotatingFileWriter {
        &self.file_output
    }

    /// The configuration currently in effect.
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config_tx.borrow())
    }

    pub fn try_enqueue(&self, record: LogRecord) -> EnqueueResult {
        self.queue.try_enqueue(record)
    }

    pub async fn enqueue(&self, record: LogRecord) -> EnqueueResult {
        self.queue.enqueue(record).await
    }

    /// Sink counters plus the current queue depth.
    pub fn snapshot(&self) -> SinkSnapshot {
        let mut snapshot = self.sink.snapshot();
        snapshot.queue_depth = self.queue.len();
        snapshot
    }

    /// False once shutdown has begun.
    pub fn is_running(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Apply a new configuration to the running pipeline.
    ///
    /// Queue limits and logger outputs apply immediately. Batch limits apply from the
    /// next batch opened, retry and timeout settings from the next batch created,
    /// breaker thresholds from each worker's next decision. Worker count and handoff
    /// capacity are fixed at start; changes to them are ignored with a warning.
    pub fn update_config(&self, config: Config) -> Result<(), PipelineError> {
        validate_config(&config)?;

        let current = self.config();
        let mut next = config;
        if next.workers.count != current.workers.count {
            warn!(
                current = current.workers.count,
                requested = next.workers.count,
                "workers.count cannot change while running, keeping current value"
            );
            next.workers.count = current.workers.count;
        }
        if next.workers.handoff_capacity != current.workers.handoff_capacity {
            warn!(
                current = current.workers.handoff_capacity,
                requested = next.workers.handoff_capacity,
                "workers.handoff_capacity cannot change while running, keeping current value"
            );
            next.workers.handoff_capacity = current.workers.handoff_capacity;
        }

        self.queue.reconfigure(&next.queue);
        self.file_output.reconfigure(&next.logger.file);
        self.config_tx.send_replace(Arc::new(next));
        info!("Pipeline configuration updated");
        Ok(())
    }

    /// Stop intake, flush the open batch and wait for in-flight deliveries up to
    /// `workers.shutdown_grace`. Tasks still running after the grace period are aborted.
    ///
    /// Safe to call any number of times, concurrently or not; later calls return once
    /// the first has finished.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        let Some(PipelineTasks { mut batcher, mut workers }) = tasks.take() else {
            return;
        };

        info!(queued = self.queue.len(), "Shutting down log shipment pipeline");
        self.queue.close();

        let grace = self.config().workers.shutdown_grace;
        let deadline = Instant::now().checked_add(grace);

        if until_deadline(deadline, &mut batcher).await.is_none() {
            warn!("Batcher did not finish within shutdown grace period, aborting");
            batcher.abort();
        }

        let all_workers = futures::future::join_all(workers.iter_mut());
        if until_deadline(deadline, all_workers).await.is_none() {
            let unfinished = workers.iter().filter(|w| !w.is_finished()).count();
            warn!(
                unfinished,
                "Transport workers did not finish within shutdown grace period, aborting"
            );
            for worker in &workers {
                worker.abort();
            }
        }

        self.file_output.close();

        let snapshot = self.snapshot();
        info!(
            delivered_batches = snapshot.delivered_batches,
            dropped_batches = snapshot.dropped_batches,
            records_evicted = snapshot.records_evicted,
            "Log shipment pipeline stopped"
        );
        debug!(abandoned = snapshot.queue_depth, "Records left in queue at shutdown");
    }
}

/// Handle to the runtime the caller is on.
pub(crate) fn current_runtime() -> Result<Handle, PipelineError> {
    Handle::try_current().map_err(|_| PipelineError::NoRuntime)
}

/// Run `future` until `deadline`. `None` if the deadline passed first. Without a
/// deadline the future runs to completion.
async fn until_deadline<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.queue.close();
    }
}
