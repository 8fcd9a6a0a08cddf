use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use chanlog_logging::{LogConfig, LogFormat};
use chanlog_writer::ChangesWriterConfig;

/// Full simulator configuration, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of channels documents are spread over
    pub channels: usize,
    /// Number of distinct documents
    pub docs: usize,
    /// Total changes to submit
    pub changes: u64,
    /// Concurrent producer tasks
    pub producers: usize,
    /// Chance that a change also removes the document from a channel
    pub removal_rate: f64,
    /// Checkpoint after every this-many changes; 0 checkpoints once at the end
    pub checkpoint_every: u64,
    pub writer: ChangesWriterConfig,
    pub logging: LogConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            channels: 8,
            docs: 200,
            changes: 5_000,
            producers: 4,
            removal_rate: 0.05,
            checkpoint_every: 0,
            writer: ChangesWriterConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Config file (if any) with command-line overrides applied
    pub fn from_args(args: &RunArgs) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(channels) = args.channels {
            config.channels = channels;
        }
        if let Some(docs) = args.docs {
            config.docs = docs;
        }
        if let Some(changes) = args.changes {
            config.changes = changes;
        }
        if let Some(producers) = args.producers {
            config.producers = producers;
        }
        if let Some(rate) = args.removal_rate {
            config.removal_rate = rate;
        }
        if let Some(every) = args.checkpoint_every {
            config.checkpoint_every = every;
        }
        if let Some(length) = args.max_log_length {
            config.writer.max_channel_log_length = length;
        }
        if args.always_compact {
            config.writer.always_compact = true;
        }
        if args.no_star {
            config.writer.enable_star_channel = false;
        }
        if let Some(level) = &args.log_level {
            config.logging.level = level.clone();
        }
        if args.pretty {
            config.logging.format = LogFormat::Pretty;
        }
        if args.log_compaction {
            config.logging = config.logging.with_compaction_diagnostics();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.channels > 0, "channels must be at least 1");
        anyhow::ensure!(self.docs > 0, "docs must be at least 1");
        anyhow::ensure!(self.producers > 0, "producers must be at least 1");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.removal_rate),
            "removal_rate must be within 0..=1, got {}",
            self.removal_rate
        );
        self.writer.validate()?;
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "chanlog-sim", about = "Drive channel-log writers with synthetic document changes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a simulation and verify every channel log
    Run(RunArgs),
    /// Print the effective configuration as JSON
    ShowConfig(RunArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Number of channels
    #[arg(long)]
    pub channels: Option<usize>,
    /// Number of distinct documents
    #[arg(long)]
    pub docs: Option<usize>,
    /// Total changes to submit
    #[arg(long)]
    pub changes: Option<u64>,
    /// Concurrent producer tasks
    #[arg(long)]
    pub producers: Option<usize>,
    /// Entries each channel log is compacted down to
    #[arg(long)]
    pub max_log_length: Option<usize>,
    /// Compact on every write
    #[arg(long)]
    pub always_compact: bool,
    /// Do not maintain the `*` channel
    #[arg(long)]
    pub no_star: bool,
    /// Chance (0..=1) that a change removes its document from a channel
    #[arg(long)]
    pub removal_rate: Option<f64>,
    /// Checkpoint after every N changes
    #[arg(long)]
    pub checkpoint_every: Option<u64>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Human-readable log output instead of JSONL
    #[arg(long)]
    pub pretty: bool,
    /// Log every compaction, including attempts that removed nothing
    #[arg(long)]
    pub log_compaction: bool,
    /// JSON config file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "chanlog-sim",
            "run",
            "--channels",
            "3",
            "--changes",
            "100",
            "--no-star",
            "--always-compact",
            "--max-log-length",
            "20",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let config = SimConfig::from_args(&args).unwrap();
        assert_eq!(config.channels, 3);
        assert_eq!(config.changes, 100);
        assert_eq!(config.docs, 200);
        assert!(!config.writer.enable_star_channel);
        assert!(config.writer.always_compact);
        assert_eq!(config.writer.max_channel_log_length, 20);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_logging_flags() {
        let cli = Cli::try_parse_from([
            "chanlog-sim",
            "run",
            "--pretty",
            "--log-level",
            "warn",
            "--log-compaction",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        let config = SimConfig::from_args(&args).unwrap();
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(
            config.logging.targets[chanlog_logging::COMPACTION_TARGET],
            "debug"
        );
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"channels": 5, "producers": 2, "writer": {{"max_channel_log_length": 50}}}}"#
        )
        .unwrap();

        let args = RunArgs {
            config: Some(file.path().to_path_buf()),
            producers: Some(6),
            ..Default::default()
        };
        let config = SimConfig::from_args(&args).unwrap();
        assert_eq!(config.channels, 5);
        assert_eq!(config.producers, 6);
        assert_eq!(config.writer.max_channel_log_length, 50);
        assert!(config.writer.enable_star_channel);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let args = RunArgs {
            removal_rate: Some(1.5),
            ..Default::default()
        };
        assert!(SimConfig::from_args(&args).is_err());

        let args = RunArgs {
            producers: Some(0),
            ..Default::default()
        };
        assert!(SimConfig::from_args(&args).is_err());

        let args = RunArgs {
            max_log_length: Some(0),
            ..Default::default()
        };
        assert!(SimConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let args = RunArgs {
            config: Some(PathBuf::from("/nonexistent/chanlog-sim.json")),
            ..Default::default()
        };
        let err = SimConfig::from_args(&args).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
