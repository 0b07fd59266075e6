use crate::context::{Fields, TraceContext, UNKNOWN_TRACE_ID};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed per-record overhead added to the byte estimate (timestamps, keys, framing).
const RECORD_OVERHEAD_BYTES: usize = 96;

/// Process-wide record sequence. Never reset, so values are never reused.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "critical" => Ok(Level::Critical),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Where a record was logged from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
}

impl From<&'static Location<'static>> for SourceLocation {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

/// One structured log record. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub trace_id: String,
    pub message: String,
    pub fields: Fields,
    pub logger: String,
    /// Call site, set by [`crate::Logger`]. `None` for records built directly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl LogRecord {
    /// Rough serialized size, used for the batch byte ceiling.
    pub fn estimated_size(&self) -> usize {
        let fields: usize = self.fields.iter().map(|(k, v)| k.len() + v.len()).sum();
        RECORD_OVERHEAD_BYTES + self.message.len() + self.trace_id.len() + self.logger.len() + fields
    }
}

/// Build a record, assigning the next process-wide sequence number.
///
/// Fields come from the context first, in insertion order; call-site fields win on key
/// collisions and keep the position the key already had. Without a context the trace
/// id is `"unknown"`.
pub fn build_record<K, V>(
    context: Option<&TraceContext>,
    logger: &str,
    level: Level,
    message: impl Into<String>,
    fields: impl IntoIterator<Item = (K, V)>,
) -> LogRecord
where
    K: Into<String>,
    V: Into<String>,
{
    let (trace_id, mut merged) = match context {
        Some(ctx) => (ctx.trace_id().to_string(), ctx.fields().clone()),
        None => (UNKNOWN_TRACE_ID.to_string(), Fields::new()),
    };
    merged.extend(fields);

    LogRecord {
        sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        timestamp: Utc::now(),
        level,
        trace_id,
        message: message.into(),
        fields: merged,
        logger: logger.to_string(),
        location: None,
    }
}
