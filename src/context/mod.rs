//! Request-scoped trace context.
//!
//! A [`TraceContext`] is an immutable value created at the start of a unit of work. It is
//! passed explicitly to loggers, or installed as the task-local current context with
//! [`TraceContext::scope`] so code deeper in the call stack can pick it up without extra
//! parameters.

pub mod fields;
pub mod middleware;
pub mod trace;

pub use fields::Fields;
pub use middleware::{propagate_trace_context, TRACE_ID_HEADER};
pub use trace::{generate_trace_id, TraceContext, UNKNOWN_TRACE_ID};
