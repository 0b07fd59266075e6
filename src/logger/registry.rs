//! Process-wide logger registry.
//!
//! [`init`] starts one pipeline and installs a registry of named loggers around it;
//! [`shutdown`] drains that pipeline and removes the registry. Loggers handed out
//! before `init` or after `shutdown` are detached.

use super::Logger;
use crate::config::Config;
use crate::pipeline::runner::current_runtime;
use crate::pipeline::{Pipeline, PipelineError};
use crate::transport::IngestClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::info;

static REGISTRY: RwLock<Option<Arc<LoggerRegistry>>> = RwLock::new(None);

/// Named loggers sharing one pipeline. Handles are created on first request.
pub struct LoggerRegistry {
    pipeline: Arc<Pipeline>,
    loggers: Mutex<HashMap<String, Logger>>,
}

impl LoggerRegistry {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            loggers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Logger {
        let mut loggers = self.loggers.lock().unwrap_or_else(|e| e.into_inner());
        loggers
            .entry(name.to_string())
            .or_insert_with(|| Logger::new(name, Arc::clone(&self.pipeline)))
            .clone()
    }

    pub fn logger_names(&self) -> Vec<String> {
        let loggers = self.loggers.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = loggers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }
}

fn current() -> Option<Arc<LoggerRegistry>> {
    REGISTRY.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Start the pipeline and install the global registry.
///
/// Fails with [`PipelineError::NoRuntime`] outside a tokio runtime and with
/// [`PipelineError::AlreadyRunning`] while a previous `init` is still live.
pub fn init(config: Config, client: Arc<dyn IngestClient>) -> Result<Arc<Pipeline>, PipelineError> {
    current_runtime()?;

    let mut slot = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    if slot.as_ref().is_some_and(|r| r.pipeline.is_running()) {
        return Err(PipelineError::AlreadyRunning);
    }

    let pipeline = Arc::new(Pipeline::start(config, client)?);
    *slot = Some(Arc::new(LoggerRegistry::new(Arc::clone(&pipeline))));
    info!("Logger registry initialized");
    Ok(pipeline)
}

/// Logger handle for `name`; detached when the registry is not initialized.
pub fn get_logger(name: &str) -> Logger {
    match current() {
        Some(registry) => registry.get(name),
        None => Logger::detached(name),
    }
}

pub fn is_initialized() -> bool {
    current().is_some()
}

/// Pipeline behind the global registry, if initialized.
pub fn global_pipeline() -> Option<Arc<Pipeline>> {
    current().map(|r| Arc::clone(r.pipeline()))
}

/// Drain the global pipeline and tear the registry down. Idempotent; concurrent
/// callers all return after the drain has finished.
pub async fn shutdown() {
    let Some(registry) = current() else {
        return;
    };

    registry.pipeline.shutdown().await;

    let mut slot = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    if slot.as_ref().is_some_and(|r| Arc::ptr_eq(r, &registry)) {
        *slot = None;
        info!("Logger registry torn down");
    }
}
