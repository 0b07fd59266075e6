use crate::context::propagate_trace_context;
use crate::pipeline::Pipeline;
use axum::extract::State;
use axum::routing::get;
use axum::{middleware, Json, Router};
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::sink::SinkSnapshot;

async fn health_check() -> &'static str {
    "OK"
}

async fn get_diagnostics(State(pipeline): State<Arc<Pipeline>>) -> Json<SinkSnapshot> {
    Json(pipeline.snapshot())
}

/// Routes for the diagnostics endpoint, without binding a listener.
pub fn diagnostics_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/diagnostics", get(get_diagnostics))
        .with_state(pipeline)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(propagate_trace_context)),
        )
}

/// Serve diagnostics until `shutdown_rx` turns true.
pub async fn run_server(
    listen: &str,
    pipeline: Arc<Pipeline>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = diagnostics_router(pipeline);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("Diagnostics server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Diagnostics server shutting down gracefully");
        })
        .await
}
