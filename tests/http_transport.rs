use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use logship::config::{Config, EndpointConfig};
use logship::diagnostics::DropReason;
use logship::logger::build_record;
use logship::pipeline::{Batch, DeliverySettings};
use logship::transport::{HttpIngestClient, IngestClient, IngestError};
use logship::{Level, Pipeline, TraceContext};
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-process ingestion endpoint. Answers with the scripted statuses in order, then 200.
#[derive(Default)]
struct FakeEndpoint {
    statuses: Mutex<VecDeque<StatusCode>>,
    received: Mutex<Vec<(HeaderMap, Value)>>,
}

async fn ingest(
    State(endpoint): State<Arc<FakeEndpoint>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let status = endpoint
        .statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(StatusCode::OK);
    endpoint.received.lock().unwrap().push((headers, body));
    status
}

async fn spawn_endpoint(statuses: &[StatusCode]) -> (SocketAddr, Arc<FakeEndpoint>) {
    let endpoint = Arc::new(FakeEndpoint::default());
    endpoint.statuses.lock().unwrap().extend(statuses.iter().copied());

    let app = Router::new()
        .route("/ingest", post(ingest))
        .with_state(Arc::clone(&endpoint));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, endpoint)
}

fn endpoint_config(addr: SocketAddr) -> EndpointConfig {
    EndpointConfig {
        url: format!("http://{}/ingest", addr),
        timeout: Duration::from_secs(5),
        topic_id: "topic-42".to_string(),
        token: "secret-token".to_string(),
    }
}

fn batch() -> Batch {
    let ctx = TraceContext::with_trace_id("req-7").with_field("user_id", "u-1");
    let records: Vec<_> = (0..3)
        .map(|i| build_record(Some(&ctx), "orders", Level::Warning, format!("m{}", i), [("i", i.to_string())]))
        .collect();
    Batch {
        batch_id: uuid::Uuid::new_v4(),
        byte_size_estimate: records.iter().map(|r| r.estimated_size()).sum(),
        records,
        created_at: chrono::Utc::now(),
        settings: Arc::new(DeliverySettings::from_config(&Config::default())),
    }
}

#[tokio::test]
async fn test_http_client_posts_json_payload_with_headers() {
    let (addr, endpoint) = spawn_endpoint(&[]).await;
    let client = HttpIngestClient::new(&endpoint_config(addr), "checkout").unwrap();

    let batch = batch();
    client.ship(&batch, Duration::from_secs(5)).await.unwrap();

    let received = endpoint.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    let (headers, body) = &received[0];

    assert_eq!(headers["authorization"], "Bearer secret-token");
    assert_eq!(headers["x-topic-id"], "topic-42");
    assert_eq!(headers["content-type"], "application/json");

    assert_eq!(body["source"], "checkout");
    assert_eq!(body["topic_id"], "topic-42");
    assert_eq!(body["batch_id"], batch.batch_id.to_string());
    let logs = body["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0]["level"], "WARNING");
    assert_eq!(logs[0]["logger"], "orders");
    assert_eq!(logs[0]["trace_id"], "req-7");
    assert_eq!(logs[2]["message"], "m2");
    assert_eq!(logs[1]["fields"]["user_id"], "u-1");
    assert!(logs[0]["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_http_client_maps_error_statuses() {
    let (addr, _endpoint) =
        spawn_endpoint(&[StatusCode::SERVICE_UNAVAILABLE, StatusCode::BAD_REQUEST]).await;
    let client = HttpIngestClient::new(&endpoint_config(addr), "checkout").unwrap();

    match client.ship(&batch(), Duration::from_secs(5)).await {
        Err(e @ IngestError::Status { status: 503, .. }) => assert!(e.is_retryable()),
        other => panic!("expected 503, got {:?}", other),
    }
    match client.ship(&batch(), Duration::from_secs(5)).await {
        Err(e @ IngestError::Status { status: 400, .. }) => assert!(!e.is_retryable()),
        other => panic!("expected 400, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_client_connection_refused_is_retryable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpIngestClient::new(&endpoint_config(addr), "checkout").unwrap();
    let err = client.ship(&batch(), Duration::from_secs(2)).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_pipeline_retries_transient_status_over_http() {
    let (addr, endpoint) = spawn_endpoint(&[StatusCode::SERVICE_UNAVAILABLE]).await;

    let mut config = Config::default();
    config.logger.console = false;
    config.endpoint = endpoint_config(addr);
    config.retry.base_delay = Duration::from_millis(10);
    config.workers.count = 1;

    let client = Arc::new(HttpIngestClient::new(&config.endpoint, "checkout").unwrap());
    let pipeline = Pipeline::start(config, client).unwrap();

    for i in 0..4 {
        let record = build_record(None, "orders", Level::Info, format!("r{}", i), [("n", "1")]);
        pipeline.enqueue(record).await;
    }
    pipeline.shutdown().await;

    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.delivered_batches, 1);
    assert_eq!(snapshot.delivered_records, 4);
    assert_eq!(snapshot.delivery_attempts, 2);
    assert_eq!(snapshot.recent_outcomes[0].attempt_count, 2);

    let received = endpoint.received.lock().unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[1].1["logs"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_pipeline_drops_rejected_batch_without_retry() {
    let (addr, endpoint) = spawn_endpoint(&[StatusCode::UNPROCESSABLE_ENTITY]).await;

    let mut config = Config::default();
    config.logger.console = false;
    config.endpoint = endpoint_config(addr);
    config.workers.count = 1;

    let client = Arc::new(HttpIngestClient::new(&config.endpoint, "checkout").unwrap());
    let pipeline = Pipeline::start(config, client).unwrap();

    pipeline
        .enqueue(build_record(None, "orders", Level::Error, "bad", [("n", "1")]))
        .await;
    pipeline.shutdown().await;

    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.dropped_rejected, 1);
    assert_eq!(snapshot.recent_outcomes[0].drop_reason, Some(DropReason::Rejected));
    assert_eq!(snapshot.delivery_attempts, 1);
    assert_eq!(endpoint.received.lock().unwrap().len(), 1);
}
