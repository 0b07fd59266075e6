pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSHIP CONFIGURATION
# =============================================================================
# Every key is optional; the values below are the defaults unless noted.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logship/config.yml
#   3. /etc/logship/config.yml
#
# Values may reference environment variables with $env{NAME}.

# Tag attached to every shipped payload (defaults to the host name)
# service_name: my-service

# Each output has its own minimum level: debug, info, warning, error, critical
logger:
  # Shipped to the ingestion endpoint
  level: info
  # Mirror records to the local console
  console: true
  console_level: info
  # Local log file, rotated to <path>.1 .. <path>.<backups> at max_bytes
  file:
    enabled: false
    path: ~/.local/state/logship/logship.log
    level: info
    max_bytes: 10485760
    backups: 5

# =============================================================================
# SHIPMENT QUEUE
# =============================================================================
queue:
  capacity: 2000
  # drop_oldest: evict the oldest queued record when full
  # block:       wait up to block_timeout for space, then reject the record
  overflow: drop_oldest
  block_timeout: 100ms

# =============================================================================
# BATCHING
# =============================================================================
# A batch closes when it reaches max_records or max_bytes, or when max_wait has
# elapsed since its first record, whichever comes first.
batch:
  max_records: 100
  max_bytes: 1048576
  max_wait: 3s

workers:
  count: 4
  # Completed batches waiting for a free worker
  handoff_capacity: 8
  # Time given to in-flight batches on shutdown
  shutdown_grace: 5s

retry:
  # Total delivery attempts per batch
  max_attempts: 3
  base_delay: 500ms
  max_delay: 30s
  jitter: true

circuit_breaker:
  # Consecutive failed batches before a worker stops calling the endpoint
  failure_threshold: 5
  recovery_timeout: 60s

# =============================================================================
# INGESTION ENDPOINT (required for `logship run`)
# =============================================================================
endpoint:
  url: http://127.0.0.1:9880/ingest
  timeout: 5s
  topic_id: ""
  token: $env{LOGSHIP_TOKEN}

diagnostics:
  enabled: true
  listen: 127.0.0.1:9881

reload:
  # Poll the config file and apply changes without restarting
  enabled: false
  interval: 10s
"#
    .to_string()
}
