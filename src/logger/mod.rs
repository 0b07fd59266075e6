//! Structured loggers that feed the shipment pipeline.
//!
//! A [`Logger`] is a cheap, cloneable handle: it stamps records with the explicit or
//! ambient [`TraceContext`] and the call site, then hands them to each output whose
//! level they meet: the shipment queue, the local `tracing` subscriber and the
//! rotating log file. Logging never fails the caller; the worst case is
//! [`EnqueueResult::Rejected`].

pub mod file;
pub mod record;
pub mod registry;

pub use file::RotatingFileWriter;
pub use record::{build_record, Level, LogRecord, SourceLocation};
pub use registry::{get_logger, init, is_initialized, shutdown, LoggerRegistry};

use crate::context::TraceContext;
use crate::pipeline::{EnqueueResult, Pipeline};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

/// Target used when records are mirrored to the local subscriber.
pub const CONSOLE_TARGET: &str = "logship::records";

#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    pipeline: Option<Arc<Pipeline>>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl Logger {
    pub fn new(name: &str, pipeline: Arc<Pipeline>) -> Self {
        Self {
            name: Arc::from(name),
            pipeline: Some(pipeline),
        }
    }

    /// A logger with no pipeline behind it. Every record is rejected.
    pub fn detached(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            pipeline: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the pipeline behind this logger still accepts records.
    pub fn is_attached(&self) -> bool {
        self.pipeline.as_ref().is_some_and(|p| p.is_running())
    }

    /// True when any output (endpoint, console or file) takes records at `level`.
    pub fn is_enabled_for(&self, level: Level) -> bool {
        match &self.pipeline {
            Some(pipeline) => pipeline.config().logger.accepts(level),
            None => true,
        }
    }

    /// Log at `level`, waiting for queue space under the block policy.
    ///
    /// Returns `None` when the record is not shipped because the level is below
    /// `logger.level`; console and file outputs apply their own levels. Without `ctx`
    /// the ambient context installed by [`TraceContext::scope`] is used, if any. The
    /// caller's file and line are recorded on the record.
    #[track_caller]
    pub fn log<'a>(
        &'a self,
        level: Level,
        ctx: Option<&'a TraceContext>,
        message: impl Into<String>,
        fields: &'a [(&'a str, &'a str)],
    ) -> impl Future<Output = Option<EnqueueResult>> + Send + 'a {
        let location = Location::caller();
        let message = message.into();
        async move {
            let Some(pipeline) = &self.pipeline else {
                return Some(EnqueueResult::Rejected);
            };
            let record = self.prepare(pipeline, level, ctx, message, fields, location)?;
            Some(pipeline.enqueue(record).await)
        }
    }

    /// Like [`Logger::log`] but never waits.
    #[track_caller]
    pub fn try_log(
        &self,
        level: Level,
        ctx: Option<&TraceContext>,
        message: impl Into<String>,
        fields: &[(&str, &str)],
    ) -> Option<EnqueueResult> {
        let location = Location::caller();
        let Some(pipeline) = &self.pipeline else {
            return Some(EnqueueResult::Rejected);
        };
        let record = self.prepare(pipeline, level, ctx, message.into(), fields, location)?;
        Some(pipeline.try_enqueue(record))
    }

    #[track_caller]
    pub fn debug<'a>(
        &'a self,
        ctx: Option<&'a TraceContext>,
        message: impl Into<String>,
        fields: &'a [(&'a str, &'a str)],
    ) -> impl Future<Output = Option<EnqueueResult>> + Send + 'a {
        self.log(Level::Debug, ctx, message, fields)
    }

    #[track_caller]
    pub fn info<'a>(
        &'a self,
        ctx: Option<&'a TraceContext>,
        message: impl Into<String>,
        fields: &'a [(&'a str, &'a str)],
    ) -> impl Future<Output = Option<EnqueueResult>> + Send + 'a {
        self.log(Level::Info, ctx, message, fields)
    }

    #[track_caller]
    pub fn warning<'a>(
        &'a self,
        ctx: Option<&'a TraceContext>,
        message: impl Into<String>,
        fields: &'a [(&'a str, &'a str)],
    ) -> impl Future<Output = Option<EnqueueResult>> + Send + 'a {
        self.log(Level::Warning, ctx, message, fields)
    }

    #[track_caller]
    pub fn error<'a>(
        &'a self,
        ctx: Option<&'a TraceContext>,
        message: impl Into<String>,
        fields: &'a [(&'a str, &'a str)],
    ) -> impl Future<Output = Option<EnqueueResult>> + Send + 'a {
        self.log(Level::Error, ctx, message, fields)
    }

    #[track_caller]
    pub fn critical<'a>(
        &'a self,
        ctx: Option<&'a TraceContext>,
        message: impl Into<String>,
        fields: &'a [(&'a str, &'a str)],
    ) -> impl Future<Output = Option<EnqueueResult>> + Send + 'a {
        self.log(Level::Critical, ctx, message, fields)
    }

    /// Log `err` and its source chain at ERROR under the `exception` field.
    #[track_caller]
    pub fn exception<'a>(
        &'a self,
        ctx: Option<&'a TraceContext>,
        message: impl Into<String>,
        err: &(dyn Error + 'static),
        fields: &'a [(&'a str, &'a str)],
    ) -> impl Future<Output = Option<EnqueueResult>> + Send + 'a {
        let location = Location::caller();
        let message = message.into();
        let chain = error_chain(err);
        async move {
            let Some(pipeline) = &self.pipeline else {
                return Some(EnqueueResult::Rejected);
            };
            let mut all = fields.to_vec();
            all.push(("exception", chain.as_str()));
            let record = self.prepare(pipeline, Level::Error, ctx, message, &all, location)?;
            Some(pipeline.enqueue(record).await)
        }
    }

    /// Build the record and hand it to the console and file outputs whose level it
    /// meets. Returns it only when it should also be shipped.
    fn prepare(
        &self,
        pipeline: &Pipeline,
        level: Level,
        ctx: Option<&TraceContext>,
        message: String,
        fields: &[(&str, &str)],
        location: &'static Location<'static>,
    ) -> Option<LogRecord> {
        let config = pipeline.config();
        let outputs = &config.logger;
        let ship = level >= outputs.level;
        let console = outputs.console && level >= outputs.console_level;
        let file = outputs.file.enabled && level >= outputs.file.level;
        if !(ship || console || file) {
            return None;
        }

        let ambient;
        let ctx = match ctx {
            Some(ctx) => Some(ctx),
            None => {
                ambient = TraceContext::current();
                ambient.as_ref()
            }
        };

        let mut record = build_record(ctx, &self.name, level, message, fields.iter().copied());
        record.location = Some(SourceLocation::from(location));

        if console {
            mirror_to_console(&record);
        }
        if file {
            pipeline.file_output().write(&record);
        }
        ship.then_some(record)
    }
}

/// `outer: inner: root`
fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

fn mirror_to_console(record: &LogRecord) {
    match record.level {
        Level::Debug => tracing::debug!(
            target: CONSOLE_TARGET,
            logger = %record.logger,
            trace_id = %record.trace_id,
            sequence = record.sequence,
            fields = %record.fields,
            "{}",
            record.message
        ),
        Level::Info => tracing::info!(
            target: CONSOLE_TARGET,
            logger = %record.logger,
            trace_id = %record.trace_id,
            sequence = record.sequence,
            fields = %record.fields,
            "{}",
            record.message
        ),
        Level::Warning => tracing::warn!(
            target: CONSOLE_TARGET,
            logger = %record.logger,
            trace_id = %record.trace_id,
            sequence = record.sequence,
            fields = %record.fields,
            "{}",
            record.message
        ),
        Level::Error | Level::Critical => tracing::error!(
            target: CONSOLE_TARGET,
            logger = %record.logger,
            trace_id = %record.trace_id,
            sequence = record.sequence,
            fields = %record.fields,
            level = record.level.as_str(),
            "{}",
            record.message
        ),
    }
}
