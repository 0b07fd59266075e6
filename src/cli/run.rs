use crate::config::parse::load_config_with_version;
use crate::config::reload::{spawn_reloader, ConfigReloader};
use crate::context::TraceContext;
use crate::diagnostics::run_server;
use crate::logger::{registry, Logger};
use crate::pipeline::EnqueueResult;
use crate::transport::{HttpIngestClient, IngestError};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Logger name used for records read from stdin.
pub const STDIN_LOGGER: &str = "stdin";

/// Lines read ahead of the pipeline before the reader thread waits.
const LINE_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] IngestError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("stdin read error: {0}")]
    Stdin(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logship/config.yml");
            eprintln!("  /etc/logship/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logship config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_shipper(&config_path).await.map_err(|e| e.into())
}

async fn run_shipper(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let (config, version) = load_config_with_version(config_path)?;

    let service_name = config.service_name();
    let client = Arc::new(HttpIngestClient::new(&config.endpoint, service_name.clone())?);
    info!(endpoint = %client.url(), service = %service_name, "Using HTTP ingestion endpoint");

    let diagnostics = config.diagnostics.clone();
    let reload = config.reload.clone();
    let pipeline = registry::init(config, client)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_handle = if diagnostics.enabled {
        let pipeline = Arc::clone(&pipeline);
        let shutdown_rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_server(&diagnostics.listen, pipeline, shutdown_rx).await {
                error!(error = %e, "Diagnostics server error");
            }
        }))
    } else {
        None
    };

    let reloader_handle = if reload.enabled {
        info!(interval = ?reload.interval, "Config hot reload enabled");
        let reloader = ConfigReloader::new(config_path.to_path_buf(), Some(version));
        Some(spawn_reloader(
            reloader,
            Arc::clone(&pipeline),
            reload.interval,
            shutdown_rx.clone(),
        ))
    } else {
        None
    };

    let session = TraceContext::new()
        .with_fields([("source", "stdin"), ("service", service_name.as_str())]);
    info!(trace_id = %session.trace_id(), "Shipping stdin lines, press Ctrl+C to stop");

    let logger = registry::get_logger(STDIN_LOGGER);
    let lines = spawn_line_reader(io::BufReader::new(io::stdin()));

    let result = tokio::select! {
        result = session.scope(ship_lines(&logger, lines)) => result.map(|_| ()),
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    registry::shutdown().await;

    if let Some(handle) = server_handle {
        handle.await?;
    }
    if let Some(handle) = reloader_handle {
        handle.await?;
    }

    let snapshot = pipeline.snapshot();
    info!(
        delivered_batches = snapshot.delivered_batches,
        delivered_records = snapshot.delivered_records,
        dropped_batches = snapshot.dropped_batches,
        dropped_records = snapshot.dropped_records,
        records_evicted = snapshot.records_evicted,
        "Shipper stopped"
    );

    result
}

/// Read lines on a dedicated thread and forward them over a channel.
///
/// A blocked read cannot be cancelled. The thread is never joined and must not run on
/// the runtime's blocking pool, or shutdown after Ctrl+C waits for the next line.
fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    let spawned = std::thread::Builder::new()
        .name("logship-stdin".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        error!(error = %e, "Could not start stdin reader thread");
    }
    rx
}

/// Ship each line as an INFO record until the reader is exhausted. Returns the number
/// of lines read.
async fn ship_lines(
    logger: &Logger,
    mut lines: mpsc::Receiver<io::Result<String>>,
) -> Result<u64, RunError> {
    let mut line_number: u64 = 0;

    while let Some(line) = lines.recv().await {
        let line = line?;
        line_number += 1;
        if line.is_empty() {
            continue;
        }
        let number = line_number.to_string();
        if let Some(EnqueueResult::Rejected) =
            logger.info(None, line, &[("line", number.as_str())]).await
        {
            warn!(line = line_number, "Record rejected by shipment queue");
        }
    }

    info!(lines = line_number, "Reached end of input");
    Ok(line_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pipeline::{Batch, Pipeline};
    use crate::transport::IngestClient;
    use async_trait::async_trait;
    use std::io::{Cursor, Read};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CapturingClient {
        lines: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl IngestClient for CapturingClient {
        async fn ship(&self, batch: &Batch, _timeout: Duration) -> Result<(), IngestError> {
            let mut lines = self.lines.lock().unwrap();
            for record in &batch.records {
                lines.push((record.message.clone(), record.fields["line"].to_string()));
            }
            Ok(())
        }
    }

    /// Never produces input, like a terminal nobody types into.
    struct SilentInput;

    impl Read for SilentInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            loop {
                std::thread::park();
            }
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.logger.console = false;
        config.workers.count = 1;
        config
    }

    #[tokio::test]
    async fn test_ship_lines_skips_blank_lines() {
        let client = Arc::new(CapturingClient::default());
        let pipeline = Arc::new(Pipeline::start(config(), client.clone()).unwrap());
        let logger = Logger::new(STDIN_LOGGER, Arc::clone(&pipeline));

        let lines = spawn_line_reader(Cursor::new("first\n\nthird\n"));
        assert_eq!(ship_lines(&logger, lines).await.unwrap(), 3);
        pipeline.shutdown().await;

        assert_eq!(
            *client.lines.lock().unwrap(),
            vec![
                ("first".to_string(), "1".to_string()),
                ("third".to_string(), "3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_blocked_reader_does_not_hold_up_shutdown() {
        let pipeline = Arc::new(Pipeline::start(config(), Arc::new(CapturingClient::default())).unwrap());
        let logger = Logger::new(STDIN_LOGGER, Arc::clone(&pipeline));
        let lines = spawn_line_reader(io::BufReader::new(SilentInput));

        let interrupted = tokio::select! {
            _ = ship_lines(&logger, lines) => false,
            _ = tokio::time::sleep(Duration::from_millis(50)) => true,
        };
        assert!(interrupted);

        tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
            .await
            .unwrap();
    }
}
