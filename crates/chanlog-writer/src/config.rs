//! Configuration for the changes writer

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{WriterError, WriterResult};

/// Default maximum number of entries kept in a channel log
pub const DEFAULT_MAX_CHANNEL_LOG_LENGTH: usize = 500;

/// Default capacity of each channel writer's mailbox
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default pause after each committed batch
pub const DEFAULT_COALESCE_DELAY: Duration = Duration::from_millis(5);

/// Configuration for a [`ChangesWriter`](crate::ChangesWriter)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangesWriterConfig {
    /// Entries a channel log is compacted down to
    pub max_channel_log_length: usize,
    /// Attempt compaction on every write instead of probabilistically
    pub always_compact: bool,
    /// Also log every change to the universal `*` channel
    pub enable_star_channel: bool,
    /// Mailbox capacity per channel; also the largest batch one commit writes
    pub queue_capacity: usize,
    /// Pause after each commit so more changes coalesce into the next batch
    pub coalesce_delay: Duration,
}

impl Default for ChangesWriterConfig {
    fn default() -> Self {
        Self {
            max_channel_log_length: DEFAULT_MAX_CHANNEL_LOG_LENGTH,
            always_compact: false,
            enable_star_channel: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            coalesce_delay: DEFAULT_COALESCE_DELAY,
        }
    }
}

impl ChangesWriterConfig {
    /// Set the maximum channel log length
    pub fn with_max_channel_log_length(mut self, length: usize) -> Self {
        self.max_channel_log_length = length;
        self
    }

    /// Force compaction on every write
    pub fn with_always_compact(mut self, always: bool) -> Self {
        self.always_compact = always;
        self
    }

    /// Enable or disable the universal channel
    pub fn with_star_channel(mut self, enabled: bool) -> Self {
        self.enable_star_channel = enabled;
        self
    }

    /// Set the mailbox capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the post-commit delay
    pub fn with_coalesce_delay(mut self, delay: Duration) -> Self {
        self.coalesce_delay = delay;
        self
    }

    /// Check that the configuration can drive a writer
    pub fn validate(&self) -> WriterResult<()> {
        if self.max_channel_log_length == 0 {
            return Err(WriterError::Config(
                "max_channel_log_length must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(WriterError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChangesWriterConfig::default();
        assert_eq!(config.max_channel_log_length, 500);
        assert_eq!(config.queue_capacity, 1000);
        assert!(config.enable_star_channel);
        assert!(!config.always_compact);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ChangesWriterConfig::default()
            .with_max_channel_log_length(5)
            .with_always_compact(true)
            .with_star_channel(false)
            .with_queue_capacity(8)
            .with_coalesce_delay(Duration::ZERO);
        assert_eq!(config.max_channel_log_length, 5);
        assert!(config.always_compact);
        assert!(!config.enable_star_channel);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.coalesce_delay, Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let zero_length = ChangesWriterConfig::default().with_max_channel_log_length(0);
        assert!(matches!(zero_length.validate(), Err(WriterError::Config(_))));

        let zero_queue = ChangesWriterConfig::default().with_queue_capacity(0);
        assert!(matches!(zero_queue.validate(), Err(WriterError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ChangesWriterConfig =
            serde_json::from_str(r#"{"max_channel_log_length": 50, "enable_star_channel": false}"#)
                .unwrap();
        assert_eq!(config.max_channel_log_length, 50);
        assert!(!config.enable_star_channel);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.coalesce_delay, DEFAULT_COALESCE_DELAY);
    }
}
