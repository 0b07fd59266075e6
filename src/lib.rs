//! Asynchronous structured log shipment.
//!
//! Producers log through cheap [`Logger`] handles; records go into a bounded
//! shipment queue, a batcher groups them by count, size and age, and a pool of
//! transport workers delivers each batch with retry, backoff and a per-worker
//! circuit breaker. Every batch ends up delivered or dropped, and the outcome is
//! recorded for diagnostics.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! let config = logship::config::parse_config("endpoint:\n  url: http://127.0.0.1:9880/ingest\n")?;
//! let client = logship::transport::HttpIngestClient::new(&config.endpoint, config.service_name())?;
//! logship::init(config, Arc::new(client))?;
//!
//! let ctx = logship::TraceContext::new().with_field("user_id", "u-17");
//! logship::get_logger("billing")
//!     .info(Some(&ctx), "invoice sent", &[("invoice", "inv-9")])
//!     .await;
//!
//! logship::shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod logger;
pub mod pipeline;
pub mod transport;

pub use context::{Fields, TraceContext};
pub use logger::registry::{get_logger, global_pipeline, init, is_initialized, shutdown};
pub use logger::{Level, Logger};
pub use pipeline::{EnqueueResult, Pipeline, PipelineError};
