use async_trait::async_trait;
use logship::config::Config;
use logship::pipeline::Batch;
use logship::transport::{IngestClient, IngestError};
use logship::{EnqueueResult, PipelineError, TraceContext};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct CapturingClient {
    messages: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl IngestClient for CapturingClient {
    async fn ship(&self, batch: &Batch, _timeout: Duration) -> Result<(), IngestError> {
        let mut messages = self.messages.lock().unwrap();
        for record in &batch.records {
            messages.push((
                record.logger.clone(),
                record.trace_id.clone(),
                record.message.clone(),
            ));
        }
        Ok(())
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.logger.console = false;
    config.workers.count = 1;
    config
}

// The registry is process-wide, so its whole lifecycle is exercised in one test.
#[tokio::test]
async fn test_registry_lifecycle() {
    assert!(!logship::is_initialized());
    let early = logship::get_logger("early");
    assert_eq!(
        early.info(None, "before init", &[]).await,
        Some(EnqueueResult::Rejected)
    );

    assert!(logship::global_pipeline().is_none());

    let client = Arc::new(CapturingClient::default());
    let pipeline = logship::init(config(), client.clone()).unwrap();
    assert!(logship::is_initialized());
    let global = logship::global_pipeline().unwrap();
    assert!(Arc::ptr_eq(&global, &pipeline));
    drop(global);

    let second = logship::init(config(), Arc::new(CapturingClient::default()));
    assert!(matches!(second, Err(PipelineError::AlreadyRunning)));

    let api = logship::get_logger("api");
    let db = logship::get_logger("db");
    let ctx = TraceContext::with_trace_id("req-1");
    assert_eq!(
        api.info(Some(&ctx), "request received", &[("path", "/orders")]).await,
        Some(EnqueueResult::Accepted)
    );
    ctx.clone()
        .scope(async {
            db.warning(None, "slow query", &[("ms", "850")]).await;
        })
        .await;

    // A detached logger stays detached after init
    assert_eq!(
        early.info(None, "still detached", &[]).await,
        Some(EnqueueResult::Rejected)
    );

    logship::shutdown().await;
    logship::shutdown().await;
    assert!(!logship::is_initialized());
    assert!(logship::global_pipeline().is_none());
    assert!(!pipeline.is_running());
    assert_eq!(pipeline.snapshot().delivered_records, 2);

    let messages = client.messages.lock().unwrap().clone();
    assert_eq!(
        messages,
        vec![
            ("api".to_string(), "req-1".to_string(), "request received".to_string()),
            ("db".to_string(), "req-1".to_string(), "slow query".to_string()),
        ]
    );

    assert_eq!(
        api.info(None, "after shutdown", &[]).await,
        Some(EnqueueResult::Rejected)
    );
    assert_eq!(
        logship::get_logger("api").info(None, "after shutdown", &[]).await,
        Some(EnqueueResult::Rejected)
    );

    // Re-initializing after a full shutdown is allowed
    let again = Arc::new(CapturingClient::default());
    logship::init(config(), again.clone()).unwrap();
    logship::get_logger("api").info(None, "second run", &[]).await;
    logship::shutdown().await;
    assert_eq!(again.messages.lock().unwrap().len(), 1);
}

#[test]
fn test_init_outside_runtime_is_an_error() {
    let result = logship::init(config(), Arc::new(CapturingClient::default()));
    assert!(matches!(result, Err(PipelineError::NoRuntime)));
}
