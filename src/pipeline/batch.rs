use crate::config::{Config, RetryConfig};
use crate::logger::record::LogRecord;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Delivery parameters captured when a batch is opened. A config reload never changes
/// the settings of a batch that already exists.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverySettings {
    pub retry: RetryConfig,
    /// Timeout applied to every call to the ingestion endpoint.
    pub call_timeout: Duration,
}

impl DeliverySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry.clone(),
            call_timeout: config.endpoint.timeout,
        }
    }
}

/// An ordered group of records shipped in one call. Claimed by exactly one worker.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: Uuid,
    /// Records in enqueue order
    pub records: Vec<LogRecord>,
    pub created_at: DateTime<Utc>,
    pub byte_size_estimate: usize,
    pub settings: Arc<DeliverySettings>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.records.first().map(|r| r.sequence)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.records.last().map(|r| r.sequence)
    }
}
