use crate::config::EndpointConfig;
use crate::logger::record::{LogRecord, SourceLocation};
use crate::pipeline::batch::Batch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::context::Fields;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned error status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("endpoint URL is not configured")]
    MissingEndpoint,

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// Whether another attempt could succeed. Non-retryable errors drop the batch at once.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            IngestError::Payload(_) | IngestError::MissingEndpoint => false,
            IngestError::Http(e) => !e.is_builder(),
            IngestError::Timeout(_) | IngestError::Other(_) => true,
        }
    }
}

/// The remote ingestion endpoint. Implementations must honour `timeout`; the worker
/// also enforces it from the outside.
#[async_trait]
pub trait IngestClient: Send + Sync {
    async fn ship(&self, batch: &Batch, timeout: Duration) -> Result<(), IngestError>;
}

/// JSON body sent for one batch.
#[derive(Debug, Serialize)]
pub struct IngestPayload<'a> {
    pub source: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub topic_id: &'a str,
    pub batch_id: Uuid,
    pub logs: Vec<LogEntry<'a>>,
}

#[derive(Debug, Serialize)]
pub struct LogEntry<'a> {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub level: &'static str,
    pub logger: &'a str,
    pub trace_id: &'a str,
    pub message: &'a str,
    pub fields: &'a Fields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl<'a> From<&'a LogRecord> for LogEntry<'a> {
    fn from(record: &'a LogRecord) -> Self {
        Self {
            sequence: record.sequence,
            timestamp: record.timestamp,
            level: record.level.as_str(),
            logger: &record.logger,
            trace_id: &record.trace_id,
            message: &record.message,
            fields: &record.fields,
            location: record.location,
        }
    }
}

impl<'a> IngestPayload<'a> {
    pub fn new(source: &'a str, topic_id: &'a str, batch: &'a Batch) -> Self {
        Self {
            source,
            topic_id,
            batch_id: batch.batch_id,
            logs: batch.records.iter().map(LogEntry::from).collect(),
        }
    }
}

/// Ships batches as JSON over HTTP POST.
#[derive(Debug)]
pub struct HttpIngestClient {
    url: String,
    topic_id: String,
    token: String,
    service_name: String,
    client: reqwest::Client,
}

impl HttpIngestClient {
    pub fn new(config: &EndpointConfig, service_name: impl Into<String>) -> Result<Self, IngestError> {
        if config.url.is_empty() {
            return Err(IngestError::MissingEndpoint);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            url: config.url.clone(),
            topic_id: config.topic_id.clone(),
            token: config.token.clone(),
            service_name: service_name.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl IngestClient for HttpIngestClient {
    async fn ship(&self, batch: &Batch, timeout: Duration) -> Result<(), IngestError> {
        let payload = IngestPayload::new(&self.service_name, &self.topic_id, batch);
        let body = serde_json::to_vec(&payload)?;

        let mut request = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        if !self.topic_id.is_empty() {
            request = request.header("X-Topic-Id", &self.topic_id);
        }
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                IngestError::Timeout(timeout)
            } else {
                IngestError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(IngestError::Status {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        Ok(())
    }
}
