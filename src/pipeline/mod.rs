pub mod batch;
pub mod batcher;
pub mod queue;
pub mod runner;

pub use batch::{Batch, DeliverySettings};
pub use batcher::{run_batcher, BatchAccumulator};
pub use queue::{EnqueueResult, ShipmentQueue};
pub use runner::{Pipeline, PipelineError};
