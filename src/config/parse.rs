use super::types::*;
use super::version::version_of;
use crate::config::{env_var_pattern, expand_env_vars};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let (config, _) = load_config_with_version(path)?;
    Ok(config)
}

/// Load config and return it with the version of the file content it was parsed from.
/// The version hashes the raw bytes, before `$env{}` expansion, the same way
/// [`compute_config_version`] does.
pub fn load_config_with_version(path: &Path) -> Result<(Config, String), ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let config = parse_config(&yaml_string).map_err(|e| match e {
        // Wrap parse errors with file context
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;

    Ok((config, version_of(yaml_string.as_bytes())))
}

/// Parse and validate a YAML document. `$env{VAR}` references are expanded first.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    // An empty document means "all defaults"
    let config: Config = if yaml_string.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&yaml_string)?
    };

    validate_config(&config)?;
    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded_vars: Vec<String> = env_var_pattern()
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=<value>\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Check every bound the pipeline relies on. All problems are reported at once.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    let durations = [
        ("queue.block_timeout", config.queue.block_timeout),
        ("batch.max_wait", config.batch.max_wait),
        ("workers.shutdown_grace", config.workers.shutdown_grace),
        ("retry.base_delay", config.retry.base_delay),
        ("retry.max_delay", config.retry.max_delay),
        ("circuit_breaker.recovery_timeout", config.circuit_breaker.recovery_timeout),
        ("endpoint.timeout", config.endpoint.timeout),
        ("reload.interval", config.reload.interval),
    ];
    for (name, value) in durations {
        if value > MAX_DURATION {
            errors.push(format!(
                "{} must be at most {:?} (got {:?})",
                name, MAX_DURATION, value
            ));
        }
    }

    if config.logger.file.enabled && config.logger.file.path.as_os_str().is_empty() {
        errors.push("logger.file.path must be set when file output is enabled".to_string());
    }

    if config.queue.capacity == 0 {
        errors.push("queue.capacity must be at least 1".to_string());
    }
    if config.queue.overflow == OverflowPolicy::Block && config.queue.block_timeout.is_zero() {
        errors.push("queue.block_timeout must be greater than 0 with the block policy".to_string());
    }

    if config.batch.max_records == 0 {
        errors.push("batch.max_records must be at least 1".to_string());
    }
    if config.batch.max_bytes == 0 {
        errors.push("batch.max_bytes must be at least 1".to_string());
    }
    if config.batch.max_wait.is_zero() {
        errors.push("batch.max_wait must be greater than 0".to_string());
    }

    if config.workers.count == 0 || config.workers.count > 64 {
        errors.push(format!(
            "workers.count must be between 1 and 64 (got {})",
            config.workers.count
        ));
    }
    if config.workers.handoff_capacity == 0 {
        errors.push("workers.handoff_capacity must be at least 1".to_string());
    }

    validate_retry(&config.retry, &mut errors);

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push("circuit_breaker.failure_threshold must be at least 1".to_string());
    }
    if config.circuit_breaker.recovery_timeout.is_zero() {
        errors.push("circuit_breaker.recovery_timeout must be greater than 0".to_string());
    }

    if !config.endpoint.url.is_empty()
        && !config.endpoint.url.starts_with("http://")
        && !config.endpoint.url.starts_with("https://")
    {
        errors.push(format!(
            "endpoint.url must be an http:// or https:// URL (got '{}')",
            config.endpoint.url
        ));
    }
    if config.endpoint.timeout.is_zero() {
        errors.push("endpoint.timeout must be greater than 0".to_string());
    }

    if config.diagnostics.enabled
        && config.diagnostics.listen.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(format!(
            "diagnostics.listen is not a valid socket address: '{}'",
            config.diagnostics.listen
        ));
    }

    if config.reload.enabled && config.reload.interval.is_zero() {
        errors.push("reload.interval must be greater than 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_retry(retry: &RetryConfig, errors: &mut Vec<String>) {
    if retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if retry.max_delay < retry.base_delay {
        errors.push(format!(
            "retry.max_delay ({:?}) must not be smaller than retry.base_delay ({:?})",
            retry.max_delay, retry.base_delay
        ));
    }
}
