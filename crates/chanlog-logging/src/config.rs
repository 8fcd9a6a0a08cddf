//! Logging settings shared by the simulator and the test suites
//!
//! Everything here ends up in one [`EnvFilter`](tracing_subscriber::EnvFilter)
//! plus at most two fmt layers (console and rolling file).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Per-batch commits, compaction results and skipped seeds
pub const WRITER_TARGET: &str = "chanlog_writer";
/// CAS conflicts and retries inside the in-memory bucket
pub const STORAGE_TARGET: &str = "chanlog_storage";
/// Module that logs each compaction and every attempt that found no pivot
pub const COMPACTION_TARGET: &str = "chanlog_writer::channel_writer";

/// Log file name prefix, e.g. `chanlog.2026-10-18.log`
pub const LOG_FILE_PREFIX: &str = "chanlog";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    /// Levels for individual crates or modules, applied on top of `level`
    pub targets: BTreeMap<String, String>,
    pub format: LogFormat,
    /// Write events to stdout
    pub console: bool,
    /// Also write JSON lines to a rolling file
    pub file: Option<LogFile>,
    /// Attach the enclosing spans (writer channel, change sequence) to JSON events
    pub with_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            targets: BTreeMap::new(),
            format: LogFormat::Json,
            console: true,
            file: None,
            with_spans: true,
        }
    }
}

impl LogConfig {
    /// Readable console output with writer diagnostics but no per-retry noise
    pub fn development() -> Self {
        Self {
            format: LogFormat::Pretty,
            with_spans: false,
            ..Default::default()
        }
        .with_target(WRITER_TARGET, "debug")
        .with_target(STORAGE_TARGET, "info")
    }

    /// Long simulator runs: JSON lines to a daily file under `log_dir`
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: false,
            file: Some(LogFile::daily(log_dir)),
            ..Default::default()
        }
        .with_target(STORAGE_TARGET, "warn")
    }

    /// Only warnings and failed commits, readable in captured test output
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
            with_spans: false,
            ..Default::default()
        }
    }

    /// Set the level for one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// Log every compaction and every attempt that left the log unchanged
    pub fn with_compaction_diagnostics(self) -> Self {
        self.with_target(COMPACTION_TARGET, "debug")
    }
}

/// Console line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One flattened JSON object per event
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFile {
    pub directory: PathBuf,
    pub rotation: Rotation,
    /// Rotated files to keep; `None` keeps all
    pub keep: Option<usize>,
}

impl LogFile {
    pub fn daily(directory: PathBuf) -> Self {
        Self {
            directory,
            ..Default::default()
        }
    }
}

impl Default for LogFile {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            rotation: Rotation::Daily,
            keep: Some(7),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    #[default]
    Daily,
    Hourly,
    /// One file, `chanlog.log`
    Never,
}
