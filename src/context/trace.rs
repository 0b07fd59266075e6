use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use super::fields::Fields;
use serde::Serialize;
use std::future::Future;
use uuid::Uuid;

/// Trace id used for records built outside of any context.
pub const UNKNOWN_TRACE_ID: &str = "unknown";

/// Header names checked, in order, when deriving a context from a request.
const TRACE_HEADERS: [&str; 2] = ["x-trace-id", "trace-id"];

tokio::task_local! {
    static CURRENT_CONTEXT: TraceContext;
}

/// Generate a new trace id: a UUID v4 rendered as 32 lowercase hex characters.
pub fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceContext {
    trace_id: String,
    fields: Fields,
    created_at: DateTime<Utc>,
}

impl TraceContext {
    /// Create a context with a freshly generated trace id.
    pub fn new() -> Self {
        Self::with_trace_id(generate_trace_id())
    }

    /// Create a context with a caller-supplied trace id. An empty id is replaced by a
    /// generated one.
    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        let trace_id = if trace_id.trim().is_empty() {
            generate_trace_id()
        } else {
            trace_id
        };

        Self {
            trace_id,
            fields: Fields::new(),
            created_at: Utc::now(),
        }
    }

    /// Derive a context from inbound request headers (`x-trace-id`, then `trace-id`).
    /// Falls back to a new trace id when neither header carries a usable value.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let trace_id = TRACE_HEADERS.iter().find_map(|name| {
            headers
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        });

        match trace_id {
            Some(id) => Self::with_trace_id(id),
            None => Self::new(),
        }
    }

    /// Derive a child context carrying one more field. The receiver is left untouched.
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.fields.insert(key.into(), value.into());
        child
    }

    /// Derive a child context carrying several more fields.
    pub fn with_fields<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut child = self.clone();
        child.fields.extend(fields);
        child
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Run `fut` with this context installed as the task-local current context.
    ///
    /// The context is only visible to `fut` itself; tasks spawned from inside it do not
    /// inherit it and must be given their own copy.
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_CONTEXT.scope(self, fut).await
    }

    /// Synchronous counterpart of [`TraceContext::scope`].
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT_CONTEXT.sync_scope(self, f)
    }

    /// The context installed by the innermost enclosing `scope`, if any.
    pub fn current() -> Option<TraceContext> {
        CURRENT_CONTEXT.try_with(|ctx| ctx.clone()).ok()
    }

    pub fn current_trace_id() -> Option<String> {
        CURRENT_CONTEXT.try_with(|ctx| ctx.trace_id.clone()).ok()
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}
