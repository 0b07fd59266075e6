//! Polls the config file and pushes valid changes into a running pipeline.

use super::parse::load_config;
use super::version::compute_config_version;
use crate::pipeline::Pipeline;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of one reload check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Unchanged,
    Applied { version: String },
    /// The file changed but could not be used; the running settings stay in force.
    Rejected { version: String, reason: String },
    Unreadable(String),
}

/// Tracks the last seen version of one config file.
pub struct ConfigReloader {
    path: PathBuf,
    last_version: Option<String>,
}

impl ConfigReloader {
    /// `current_version` is the version the pipeline was started with, if known.
    pub fn new(path: PathBuf, current_version: Option<String>) -> Self {
        Self {
            path,
            last_version: current_version,
        }
    }

    pub fn last_version(&self) -> Option<&str> {
        self.last_version.as_deref()
    }

    /// Re-read the file if its content hash changed and apply it to `pipeline`.
    pub fn check(&mut self, pipeline: &Pipeline) -> ReloadOutcome {
        let version = match compute_config_version(&self.path) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read config file for reload");
                return ReloadOutcome::Unreadable(e.to_string());
            }
        };

        if self.last_version.as_deref() == Some(version.as_str()) {
            return ReloadOutcome::Unchanged;
        }
        // Remember the version even when rejected so a bad file is reported once
        self.last_version = Some(version.clone());

        let result = load_config(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|config| pipeline.update_config(config).map_err(|e| e.to_string()));

        match result {
            Ok(()) => {
                info!(version = %&version[..12.min(version.len())], "Configuration reloaded");
                ReloadOutcome::Applied { version }
            }
            Err(reason) => {
                error!(
                    path = %self.path.display(),
                    error = %reason,
                    "Changed config is invalid, keeping previous settings"
                );
                ReloadOutcome::Rejected { version, reason }
            }
        }
    }
}

/// Spawn a task that calls [`ConfigReloader::check`] every `interval` until
/// `shutdown_rx` turns true.
pub fn spawn_reloader(
    mut reloader: ConfigReloader,
    pipeline: Arc<Pipeline>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    reloader.check(&pipeline);
                }
                _ = shutdown_rx.wait_for(|&v| v) => {
                    debug!("Config reloader stopping");
                    break;
                }
            }
        }
    })
}
