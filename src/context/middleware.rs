use super::trace::TraceContext;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

/// Header carrying the trace id on requests and responses.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Axum middleware: derive a [`TraceContext`] from the request headers, run the rest of
/// the stack inside it, and echo the trace id back on the response.
///
/// ```ignore
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(axum::middleware::from_fn(propagate_trace_context));
/// ```
pub async fn propagate_trace_context(request: Request, next: Next) -> Response {
    let context = TraceContext::from_headers(request.headers());
    let trace_id = context.trace_id().to_string();

    let mut response = context.scope(next.run(request)).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}
