//! Structured logging setup for chanlog
//!
//! Library crates only emit `tracing` events; this crate installs the
//! subscriber that binaries and tests use to see them.
//!
//! Console output is JSON lines unless [`LogFormat::Pretty`] is chosen; a
//! rolling file always gets JSON lines. `RUST_LOG`, when set, replaces
//! [`LogConfig::level`]; [`LogConfig::targets`] apply on top of either.
//!
//! ```ignore
//! use chanlog_logging::{ChanlogSubscriberBuilder, LogConfig};
//!
//! let _guard = ChanlogSubscriberBuilder::new()
//!     .with_config(LogConfig::development().with_compaction_diagnostics())
//!     .init()?;
//! ```

pub mod config;
pub mod error;

pub use config::{
    COMPACTION_TARGET, LOG_FILE_PREFIX, LogConfig, LogFile, LogFormat, Rotation, STORAGE_TARGET,
    WRITER_TARGET,
};
pub use error::LogError;
pub use tracing_appender::non_blocking::WorkerGuard;

use std::io::IsTerminal;

use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Builder for configuring and installing the global subscriber
pub struct ChanlogSubscriberBuilder {
    config: LogConfig,
}

impl ChanlogSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console = enabled;
        self
    }

    pub fn with_file_output(mut self, file: LogFile) -> Self {
        self.config.file = Some(file);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// With file output, the returned guard flushes the file writer when
    /// dropped and must live as long as logging is needed.
    pub fn init(self) -> Result<Option<WorkerGuard>, LogError> {
        let filter = build_env_filter(&self.config)?;

        let mut layers: Vec<BoxedLayer> = Vec::new();
        if self.config.console {
            layers.push(match self.config.format {
                LogFormat::Json => json_layer(self.config.with_spans, std::io::stdout),
                LogFormat::Pretty => fmt::layer()
                    .with_ansi(std::io::stdout().is_terminal())
                    .with_target(true)
                    .boxed(),
            });
        }

        let mut guard = None;
        if let Some(file) = &self.config.file {
            let (writer, file_guard) = file_writer(file)?;
            layers.push(json_layer(self.config.with_spans, writer));
            guard = Some(file_guard);
        }

        Registry::default()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }
}

impl Default for ChanlogSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_env_filter(config: &LogConfig) -> Result<EnvFilter, LogError> {
    let mut filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| LogError::invalid_filter(&config.level, e))?,
    };

    for (target, level) in &config.targets {
        let directive = format!("{}={}", target, level);
        let parsed: Directive = directive
            .parse()
            .map_err(|e| LogError::invalid_filter(&directive, e))?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

fn json_layer<W>(with_spans: bool, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(with_spans)
        .with_span_list(with_spans)
        .with_writer(writer)
        .boxed()
}

fn file_writer(file: &LogFile) -> Result<(NonBlocking, WorkerGuard), LogError> {
    let rotation = match file.rotation {
        Rotation::Daily => tracing_appender::rolling::Rotation::DAILY,
        Rotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
        Rotation::Never => tracing_appender::rolling::Rotation::NEVER,
    };

    std::fs::create_dir_all(&file.directory).map_err(|e| LogError::File(e.to_string()))?;

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log");
    if let Some(keep) = file.keep {
        builder = builder.max_log_files(keep);
    }
    let appender = builder
        .build(&file.directory)
        .map_err(|e| LogError::File(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// JSON lines to stdout at `info`
pub fn init_default() -> Result<(), LogError> {
    ChanlogSubscriberBuilder::new().init().map(|_| ())
}

/// Pretty console output with writer debug events
pub fn init_development() -> Result<(), LogError> {
    ChanlogSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
        .map(|_| ())
}

/// Warnings only. Safe to call from every test; only the first call installs anything.
pub fn init_testing() {
    let _ = ChanlogSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}
