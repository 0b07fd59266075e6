//! Delivery outcomes and the read-only views over them.

pub mod server;
pub mod sink;

pub use server::{diagnostics_router, run_server};
pub use sink::{
    DeliveryOutcome, DeliverySink, DeliveryStatus, DropReason, SinkSnapshot, WorkerStatus,
    RECENT_OUTCOMES,
};
