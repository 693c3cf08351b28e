//! Logging for the engine.
//!
//! Three sinks live here:
//! - the process-wide `tracing` subscriber (console, optionally JSON, optionally a
//!   daily rolling file),
//! - the per-job plaintext activity log an operator reads after the fact,
//! - the append-only tamper log, one JSON object per line.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable debug-level output for the engine
    pub debug: bool,
    /// Also write a daily rolling log file into this directory
    pub file_dir: Option<PathBuf>,
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter. Keep the returned guard alive for
/// as long as file logging should keep flushing.
pub fn init(config: LogConfig) -> Result<Option<WorkerGuard>> {
    let default_level = if config.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "blackstorm_engine={level},blackstorm={level}",
            level = default_level.as_str().to_lowercase()
        ))
    });

    let (file_layer, guard) = match config.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("blackstorm")
                .filename_suffix("log")
                .build(&dir)
                .context("Failed to create rolling log file")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if config.json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()
            .context("Failed to install tracing subscriber")?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .context("Failed to install tracing subscriber")?;
    }

    Ok(guard)
}

/// Device path reduced to something safe to embed in a file name.
pub fn device_slug(device: &str) -> String {
    let base = Path::new(device)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(device);
    base.replace(['/', '.', ' '], "_")
}

/// Timestamp fragment used in per-job file names.
pub fn file_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Plaintext `[timestamp] message` log for a single job.
///
/// Write failures are reported through tracing and otherwise ignored, so a
/// full or read-only log volume never aborts a job.
pub struct ActivityLog {
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
}

impl ActivityLog {
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: None,
        }
    }

    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open activity log {}", path.display()))?;
        Ok(Self {
            path: Some(path),
            file: Some(Mutex::new(file)),
        })
    }

    /// `create`, falling back to a disabled log with a warning.
    pub fn create_or_disabled(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::create(&path) {
            Ok(log) => log,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %format!("{:#}", err), "Activity log disabled");
                Self::disabled()
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn write(&self, message: &str) {
        let Some(file) = &self.file else {
            return;
        };
        let Ok(mut file) = file.lock() else {
            return;
        };
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        if let Err(err) = writeln!(file, "[{}] {}", stamp, message) {
            tracing::warn!(error = %err, "Failed to write activity log");
        }
    }
}

/// One tamper log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TamperEvent {
    pub timestamp: String,
    pub event_type: String,
    pub device: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl TamperEvent {
    pub fn new(
        event_type: impl Into<String>,
        device: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.into(),
            device: device.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }
}

/// Append-only JSON-lines audit trail of destructive operations.
#[derive(Debug, Clone)]
pub struct TamperLog {
    path: Option<PathBuf>,
}

impl TamperLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, event: &TamperEvent) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create tamper log directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open tamper log")?;

        let line = serde_json::to_string(event).context("Failed to encode tamper event")?;
        writeln!(file, "{}", line).context("Failed to write tamper log")?;

        tracing::info!(
            event_type = %event.event_type,
            device = %event.device,
            "Tamper event recorded"
        );
        Ok(())
    }

    /// Read every event back, skipping lines that are not valid records.
    pub fn read_all(path: &Path) -> Result<Vec<TamperEvent>> {
        let file = File::open(path).context("Failed to open tamper log")?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("Failed to read tamper log")?;
            if let Ok(event) = serde_json::from_str(&line) {
                events.push(event);
            }
        }
        Ok(events)
    }
}
