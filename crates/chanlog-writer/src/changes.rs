//! Fan-out of document changes to channel log writers

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use chanlog_core::{ChangeLog, ChannelMap, ChannelSet, EntryFlags, LogEntry, STAR_CHANNEL};
use chanlog_storage::Bucket;

use crate::channel_writer::{ChannelLogWriter, PendingChange, PendingWrite};
use crate::config::ChangesWriterConfig;
use crate::error::{WriterError, WriterResult};
use crate::key::channel_log_key;

/// Times a write is re-offered after landing on a writer that was stopped
/// under it
const MAX_ENQUEUE_ATTEMPTS: usize = 8;

/// Routes document changes into per-channel logs
///
/// Writers are created lazily, one per channel, and live until the next
/// [`checkpoint`](Self::checkpoint). No writer is created while a checkpoint
/// is stopping the previous ones, so a channel never has two writers
/// committing at once.
pub struct ChangesWriter {
    bucket: Arc<dyn Bucket>,
    config: ChangesWriterConfig,
    log_writers: DashMap<String, Arc<ChannelLogWriter>>,
    /// Held for writing by `checkpoint`, for reading while a writer is created
    creation_gate: RwLock<()>,
}

impl ChangesWriter {
    /// Create a writer over `bucket`
    pub fn new(bucket: Arc<dyn Bucket>, config: ChangesWriterConfig) -> WriterResult<Self> {
        config.validate()?;
        Ok(Self {
            bucket,
            config,
            log_writers: DashMap::new(),
            creation_gate: RwLock::new(()),
        })
    }

    pub fn config(&self) -> &ChangesWriterConfig {
        &self.config
    }

    pub fn bucket(&self) -> &Arc<dyn Bucket> {
        &self.bucket
    }

    /// Channels with a live writer, sorted
    pub fn active_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.log_writers.iter().map(|e| e.key().clone()).collect();
        channels.sort();
        channels
    }

    /// Record one document change in the log of every channel it touches
    ///
    /// `channel_map` holds every channel the document is or was in. A
    /// channel whose removal marker belongs to an earlier change is skipped;
    /// one removed by this very change gets the entry with
    /// [`EntryFlags::REMOVED`] set. The universal channel, when enabled,
    /// always gets the entry with `REMOVED` cleared.
    ///
    /// `changed_channels` is used for diagnostics only.
    #[instrument(skip_all, fields(sequence = entry.sequence, doc_id = %entry.doc_id))]
    pub async fn add_to_change_logs(
        &self,
        changed_channels: &ChannelSet,
        channel_map: &ChannelMap,
        entry: LogEntry,
        parent_rev_id: &str,
    ) -> WriterResult<()> {
        debug!(
            rev_id = %entry.rev_id,
            changed = ?changed_channels,
            "Updating channel logs"
        );

        for (channel_name, removal) in channel_map {
            let removed = match removal {
                Some(removal) if !removal.is_current(entry.sequence) => continue,
                Some(_) => true,
                None => false,
            };
            let mut channel_entry = entry.clone();
            channel_entry.flags.set(EntryFlags::REMOVED, removed);
            self.add_to_change_log(channel_name, PendingChange::new(channel_entry, parent_rev_id))
                .await?;
        }

        if self.config.enable_star_channel {
            let mut star_entry = entry;
            star_entry.flags.remove(EntryFlags::REMOVED);
            self.add_to_change_log(STAR_CHANNEL, PendingChange::new(star_entry, parent_rev_id))
                .await?;
        }
        Ok(())
    }

    /// Queue one change for a single channel's log
    pub async fn add_to_change_log(
        &self,
        channel_name: &str,
        change: PendingChange,
    ) -> WriterResult<()> {
        self.enqueue(channel_name, PendingWrite::Append(change)).await
    }

    /// Store `log` as the channel's log if the channel has none yet
    ///
    /// Runs on the channel's writer, in order with its other writes.
    pub async fn add_change_log(&self, channel_name: &str, log: ChangeLog) -> WriterResult<()> {
        self.enqueue(channel_name, PendingWrite::Seed(log)).await
    }

    /// Read a channel's log, keeping only entries after `after_seq`
    ///
    /// Returns `Ok(None)` when the channel has no log.
    pub async fn get_change_log(
        &self,
        channel_name: &str,
        after_seq: u64,
    ) -> WriterResult<Option<ChangeLog>> {
        let raw = match self.bucket.get_raw(&channel_log_key(channel_name)).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.is_empty() {
            return Ok(None);
        }

        let mut log = ChangeLog::decode(&raw)?;
        log.filter_after(after_seq);
        Ok(Some(log))
    }

    /// Stop every writer after it commits what it has queued
    ///
    /// Changes for a channel whose writer is being stopped wait until the
    /// checkpoint finishes, then go to a fresh writer. Writers are discarded
    /// even when this fails. Fails with
    /// [`WriterError::CommitFailed`] if any discarded writer lost a batch
    /// or seed to a store error.
    #[instrument(skip(self))]
    pub async fn checkpoint(&self) -> WriterResult<()> {
        let _gate = self.creation_gate.write().await;
        let channels: Vec<String> = self.log_writers.iter().map(|e| e.key().clone()).collect();
        let writers: Vec<Arc<ChannelLogWriter>> = channels
            .iter()
            .filter_map(|channel| self.log_writers.remove(channel))
            .map(|(_, writer)| writer)
            .collect();

        let results = join_all(writers.iter().map(|writer| writer.stop())).await;

        let mut failed_channels = Vec::new();
        let mut failed_writes = 0;
        let mut entries = 0;
        let mut task_error = None;
        for result in results {
            match result {
                Ok(report) => {
                    entries += report.entries_committed;
                    if report.failed_writes() > 0 {
                        warn!(
                            channel = %report.channel,
                            failed = report.failed_writes(),
                            last_error = ?report.last_error,
                            "Channel writer lost writes"
                        );
                        failed_writes += report.failed_writes();
                        failed_channels.push(report.channel);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Channel writer did not stop cleanly");
                    task_error.get_or_insert(e);
                }
            }
        }

        info!(writers = writers.len(), entries, failed_writes, "Checkpoint complete");

        if let Some(e) = task_error {
            return Err(e);
        }
        if failed_writes > 0 {
            failed_channels.sort();
            return Err(WriterError::CommitFailed {
                channels: failed_channels,
                failed_writes,
            });
        }
        Ok(())
    }

    async fn enqueue(&self, channel_name: &str, mut write: PendingWrite) -> WriterResult<()> {
        for _ in 0..MAX_ENQUEUE_ATTEMPTS {
            let writer = self.log_writer_for_channel(channel_name).await?;
            match writer.enqueue(write).await {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    // A checkpoint stopped this writer; drop it and retry on a fresh one
                    self.log_writers
                        .remove_if(channel_name, |_, current| Arc::ptr_eq(current, &writer));
                    write = rejected;
                }
            }
        }
        Err(WriterError::WriterStopped(channel_name.to_string()))
    }

    async fn log_writer_for_channel(
        &self,
        channel_name: &str,
    ) -> WriterResult<Arc<ChannelLogWriter>> {
        if let Some(writer) = self.log_writers.get(channel_name) {
            return Ok(Arc::clone(writer.value()));
        }

        let _gate = self.creation_gate.read().await;
        match self.log_writers.entry(channel_name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                debug!(channel = channel_name, "Starting channel log writer");
                let writer =
                    ChannelLogWriter::spawn(Arc::clone(&self.bucket), channel_name, &self.config)?;
                Ok(Arc::clone(entry.insert(Arc::new(writer)).value()))
            }
        }
    }
}

impl std::fmt::Debug for ChangesWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangesWriter")
            .field("config", &self.config)
            .field("active_channels", &self.active_channels())
            .finish()
    }
}
