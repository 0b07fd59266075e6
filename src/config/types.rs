use crate::logger::record::Level;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Source tag attached to every shipped payload. Falls back to the host name.
    pub service_name: Option<String>,
    pub logger: LoggerConfig,
    pub queue: QueueConfig,
    pub batch: BatchConfig,
    pub workers: WorkerConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub endpoint: EndpointConfig,
    pub diagnostics: DiagnosticsConfig,
    pub reload: ReloadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: None,
            logger: LoggerConfig::default(),
            queue: QueueConfig::default(),
            batch: BatchConfig::default(),
            workers: WorkerConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            endpoint: EndpointConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            reload: ReloadConfig::default(),
        }
    }
}

impl Config {
    /// Resolve the service name, using the machine host name when none is configured.
    pub fn service_name(&self) -> String {
        match &self.service_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => hostname::get()
                .ok()
                .and_then(|h| h.to_str().map(|s| s.to_string()))
                .unwrap_or_else(|| "logship".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerConfig {
    /// Minimum level shipped to the ingestion endpoint.
    pub level: Level,
    /// Mirror records to the local tracing subscriber.
    pub console: bool,
    pub console_level: Level,
    pub file: FileOutputConfig,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            console: true,
            console_level: Level::Info,
            file: FileOutputConfig::default(),
        }
    }
}

impl LoggerConfig {
    /// True when at least one output takes records at `level`.
    pub fn accepts(&self, level: Level) -> bool {
        level >= self.level
            || (self.console && level >= self.console_level)
            || (self.file.enabled && level >= self.file.level)
    }
}

/// Local log file, rotated by size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileOutputConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub level: Level,
    /// Size at which the file is rotated. 0 never rotates.
    pub max_bytes: u64,
    /// Rotated files kept as `<path>.1` (newest) to `<path>.<backups>`. 0 never rotates.
    pub backups: usize,
}

impl Default for FileOutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("logship.log"),
            level: Level::Info,
            max_bytes: 10 * 1024 * 1024,
            backups: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued record to admit the new one.
    DropOldest,
    /// Wait up to `block_timeout` for space, then reject.
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    #[serde(with = "humantime_serde")]
    pub block_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 2000,
            overflow: OverflowPolicy::DropOldest,
            block_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub max_records: usize,
    pub max_bytes: usize,
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_records: 100,
            max_bytes: 1024 * 1024,
            max_wait: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub count: usize,
    pub handoff_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            handoff_capacity: 8,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total delivery attempts per batch, the first one included.
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub topic_id: String,
    pub token: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(5),
            topic_id: String::new(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:9881".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReloadConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(10),
        }
    }
}
