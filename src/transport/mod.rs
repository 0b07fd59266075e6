pub mod backoff;
pub mod circuit_breaker;
pub mod client;
pub mod worker;

pub use backoff::backoff_delay;
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
pub use client::{HttpIngestClient, IngestClient, IngestError, IngestPayload, LogEntry};
pub use worker::{SharedBatchReceiver, TransportWorker};
