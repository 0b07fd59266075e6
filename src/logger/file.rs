//! Local log file output, rotated by size.
//!
//! Lines look like `2024-05-01 12:00:00.000 - orders - WARNING - [trace-id] - message`,
//! followed by ` | key=value ...` when the record has fields and ` @ file:line` when
//! the call site is known. When the next line would take the file past `max_bytes`,
//! `<path>` becomes `<path>.1`, `<path>.1` becomes `<path>.2` and so on; the file
//! beyond `backups` is deleted.

use crate::config::{expand_tilde, FileOutputConfig};
use crate::logger::record::LogRecord;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

pub struct RotatingFileWriter {
    state: Mutex<FileState>,
}

struct FileState {
    config: FileOutputConfig,
    path: PathBuf,
    file: Option<File>,
    written: u64,
    closed: bool,
}

impl RotatingFileWriter {
    /// Create the writer. When file output is enabled the file is opened right away,
    /// so an unusable path is reported to the caller instead of on the first record.
    pub fn open(config: &FileOutputConfig) -> io::Result<Self> {
        let mut state = FileState {
            config: config.clone(),
            path: expand_tilde(&config.path),
            file: None,
            written: 0,
            closed: false,
        };
        if config.enabled {
            state.ensure_open()?;
        }
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolved path of the active file.
    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    /// Apply new file settings. A new path, or disabling the output, releases the
    /// current file; the next write opens the new one.
    pub fn reconfigure(&self, config: &FileOutputConfig) {
        let mut state = self.lock();
        let path = expand_tilde(&config.path);
        if path != state.path || !config.enabled {
            state.file = None;
            state.written = 0;
        }
        state.path = path;
        state.config = config.clone();
    }

    /// Append the line for `record`. Failures are logged, never returned; the file is
    /// reopened on the next write.
    pub fn write(&self, record: &LogRecord) {
        let mut state = self.lock();
        if state.closed || !state.config.enabled {
            return;
        }

        let line = format_line(record);
        if let Err(e) = state.append(line.as_bytes()) {
            warn!(path = %state.path.display(), error = %e, "Could not write log file");
            state.file = None;
        }
    }

    /// Release the file. Later writes are ignored.
    pub fn close(&self) {
        let mut state = self.lock();
        state.file = None;
        state.closed = true;
    }
}

impl FileState {
    fn ensure_open(&mut self) -> io::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn append(&mut self, line: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        if self.should_rotate(line.len() as u64) {
            self.rotate()?;
            self.ensure_open()?;
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(line)?;
            self.written = self.written.saturating_add(line.len() as u64);
        }
        Ok(())
    }

    fn should_rotate(&self, incoming: u64) -> bool {
        self.config.max_bytes > 0
            && self.config.backups > 0
            && self.written > 0
            && self.written.saturating_add(incoming) > self.config.max_bytes
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;

        let oldest = backup_path(&self.path, self.config.backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.config.backups).rev() {
            let from = backup_path(&self.path, n);
            if from.exists() {
                fs::rename(&from, backup_path(&self.path, n + 1))?;
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, backup_path(&self.path, 1))?;
        }

        debug!(path = %self.path.display(), rotated_bytes = self.written, "Log file rotated");
        self.written = 0;
        Ok(())
    }
}

/// `<path>.<n>`
pub fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

fn format_line(record: &LogRecord) -> String {
    let mut line = format!(
        "{} - {} - {} - [{}] - {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.logger,
        record.level.as_str(),
        record.trace_id,
        record.message
    );
    if !record.fields.is_empty() {
        let _ = write!(line, " | {}", record.fields);
    }
    if let Some(location) = &record.location {
        let _ = write!(line, " @ {}:{}", location.file, location.line);
    }
    line.push('\n');
    line
}
