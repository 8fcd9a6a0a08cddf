//! Per-channel log writer
//!
//! Each channel gets one [`ChannelLogWriter`]: a bounded mailbox drained by
//! a background task. The task pulls everything already waiting (up to the
//! mailbox capacity), sorts it by sequence and commits it to the channel's
//! log document in one optimistic update. It then pauses briefly so the next
//! batch has time to fill.
//!
//! Seed logs travel through the same mailbox and are written as soon as the
//! task reaches them, independently of the batch they were drained with.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use chanlog_core::{ChangeLog, LogEntry};
use chanlog_storage::{Bucket, BucketError, WriteOptions};

use crate::config::ChangesWriterConfig;
use crate::error::{WriterError, WriterResult};
use crate::key::channel_log_key;
use crate::policy::{COMPACTION_ROLL_RANGE, CompactionPolicy, LogUpdate};

/// A change waiting to be appended to a channel log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub entry: LogEntry,
    /// Revision the change replaced, empty if unknown
    pub parent_rev_id: String,
}

impl PendingChange {
    pub fn new(entry: LogEntry, parent_rev_id: impl Into<String>) -> Self {
        Self {
            entry,
            parent_rev_id: parent_rev_id.into(),
        }
    }
}

/// Mailbox item
#[derive(Debug)]
pub(crate) enum PendingWrite {
    Append(PendingChange),
    Seed(ChangeLog),
}

/// What a writer did over its lifetime, returned by [`ChannelLogWriter::stop`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub channel: String,
    pub batches_committed: usize,
    pub entries_committed: usize,
    pub compactions: usize,
    pub failed_batches: usize,
    pub seeds_added: usize,
    pub seeds_skipped: usize,
    pub failed_seeds: usize,
    /// Message of the most recent failure
    pub last_error: Option<String>,
}

impl WriterReport {
    fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }

    /// Batches and seeds that never reached the store
    pub fn failed_writes(&self) -> usize {
        self.failed_batches + self.failed_seeds
    }
}

/// Serializes all writes to one channel's log document
pub struct ChannelLogWriter {
    channel_name: String,
    sender: RwLock<Option<mpsc::Sender<PendingWrite>>>,
    task: Mutex<Option<JoinHandle<WriterReport>>>,
}

impl ChannelLogWriter {
    /// Start a writer for `channel_name` on the current tokio runtime
    pub fn spawn(
        bucket: Arc<dyn Bucket>,
        channel_name: impl Into<String>,
        config: &ChangesWriterConfig,
    ) -> WriterResult<Self> {
        config.validate()?;
        let channel_name = channel_name.into();
        let (sender, receiver) = mpsc::channel(config.queue_capacity);

        let task = LogWriterTask {
            bucket,
            doc_key: channel_log_key(&channel_name),
            receiver,
            policy: CompactionPolicy::from_config(config),
            max_batch: config.queue_capacity,
            coalesce_delay: config.coalesce_delay,
            report: WriterReport::new(channel_name.clone()),
        };
        let span = info_span!("channel_log_writer", channel = %channel_name);
        let handle = tokio::spawn(task.run().instrument(span));

        Ok(Self {
            channel_name,
            sender: RwLock::new(Some(sender)),
            task: Mutex::new(Some(handle)),
        })
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Whether [`stop`](Self::stop) has been called
    pub fn is_stopped(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Queue a change for this channel
    ///
    /// Waits while the mailbox is full.
    pub async fn add_change(
        &self,
        entry: LogEntry,
        parent_rev_id: impl Into<String>,
    ) -> WriterResult<()> {
        self.enqueue(PendingWrite::Append(PendingChange::new(entry, parent_rev_id)))
            .await
            .map_err(|_| WriterError::WriterStopped(self.channel_name.clone()))
    }

    /// Queue a full log, stored only if the channel has no log yet
    pub async fn add_channel_log(&self, log: ChangeLog) -> WriterResult<()> {
        self.enqueue(PendingWrite::Seed(log))
            .await
            .map_err(|_| WriterError::WriterStopped(self.channel_name.clone()))
    }

    /// Hand `write` to the task, or give it back if the writer is stopped
    pub(crate) async fn enqueue(&self, write: PendingWrite) -> Result<(), PendingWrite> {
        let Some(sender) = self.sender.read().clone() else {
            return Err(write);
        };
        sender.send(write).await.map_err(|rejected| rejected.0)
    }

    /// Close the mailbox and wait until everything queued is committed
    pub async fn stop(&self) -> WriterResult<WriterReport> {
        drop(self.sender.write().take());
        let handle = self.task.lock().take();
        let Some(handle) = handle else {
            return Err(WriterError::WriterStopped(self.channel_name.clone()));
        };
        handle.await.map_err(|e| WriterError::TaskFailed {
            channel: self.channel_name.clone(),
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for ChannelLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLogWriter")
            .field("channel_name", &self.channel_name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

struct LogWriterTask {
    bucket: Arc<dyn Bucket>,
    doc_key: String,
    receiver: mpsc::Receiver<PendingWrite>,
    policy: CompactionPolicy,
    max_batch: usize,
    coalesce_delay: Duration,
    report: WriterReport,
}

impl LogWriterTask {
    async fn run(mut self) -> WriterReport {
        debug!(key = %self.doc_key, "Channel log writer started");

        while let Some(mut batch) = self.read_changes().await {
            sort_changes(&mut batch);
            match self.append_to_log(&batch).await {
                Ok(update) => {
                    self.report.batches_committed += 1;
                    self.report.entries_committed += batch.len();
                    if matches!(update, LogUpdate::Compacted { .. }) {
                        self.report.compactions += 1;
                    }
                    if !self.coalesce_delay.is_zero() {
                        tokio::time::sleep(self.coalesce_delay).await;
                    }
                }
                Err(e) => {
                    error!(
                        count = batch.len(),
                        first_sequence = batch[0].entry.sequence,
                        error = %e,
                        "Failed to commit batch to channel log"
                    );
                    self.report.failed_batches += 1;
                    self.report.last_error = Some(e.to_string());
                }
            }
        }

        info!(
            batches = self.report.batches_committed,
            entries = self.report.entries_committed,
            failed = self.report.failed_writes(),
            "Channel log writer stopped"
        );
        self.report
    }

    /// Wait for the next append, writing any seeds met on the way.
    /// `None` once the mailbox is closed and empty.
    async fn read_change(&mut self) -> Option<PendingChange> {
        loop {
            match self.receiver.recv().await? {
                PendingWrite::Append(change) => return Some(change),
                PendingWrite::Seed(log) => self.add_channel_log(log).await,
            }
        }
    }

    /// Next batch: one awaited append plus whatever is already queued
    async fn read_changes(&mut self) -> Option<Vec<PendingChange>> {
        let first = self.read_change().await?;
        let mut batch = vec![first];

        while batch.len() < self.max_batch {
            match self.receiver.try_recv() {
                Ok(PendingWrite::Append(change)) => batch.push(change),
                Ok(PendingWrite::Seed(log)) => self.add_channel_log(log).await,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Some(batch)
    }

    async fn add_channel_log(&mut self, log: ChangeLog) {
        let raw = match log.encode() {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Failed to encode seed log");
                self.report.failed_seeds += 1;
                self.report.last_error = Some(e.to_string());
                return;
            }
        };

        match self.bucket.add_raw(&self.doc_key, 0, Bytes::from(raw)).await {
            Ok(true) => {
                info!(entries = log.len(), since = log.since, "Added missing channel log");
                self.report.seeds_added += 1;
            }
            Ok(false) => {
                debug!("Channel log already exists; seed ignored");
                self.report.seeds_skipped += 1;
            }
            Err(e) => {
                warn!(error = %e, "Failed to store seed log");
                self.report.failed_seeds += 1;
                self.report.last_error = Some(e.to_string());
            }
        }
    }

    async fn append_to_log(&self, batch: &[PendingChange]) -> WriterResult<LogUpdate> {
        let policy = self.policy;
        let mut outcome = None;
        let mut compaction_attempts = 0usize;

        self.bucket
            .write_update(&self.doc_key, 0, &mut |current: &[u8]| {
                let roll = rand::rng().random_range(0..COMPACTION_ROLL_RANGE);
                let (bytes, update) = policy
                    .apply(current, batch, roll)
                    .map_err(|e| BucketError::update(e.to_string()))?;
                if update.compaction_attempted() {
                    compaction_attempts += 1;
                }
                outcome = Some(update);
                Ok((Bytes::from(bytes), WriteOptions::raw()))
            })
            .await?;

        let Some(update) = outcome else {
            return Err(BucketError::update("store committed without computing a value").into());
        };

        debug!(count = batch.len(), "Wrote sequences to channel log");
        match update {
            LogUpdate::Compacted { removed, .. } => {
                debug!(removed, attempts = compaction_attempts, "Compacted channel log");
            }
            LogUpdate::Replaced { dropped, .. } if dropped > 0 => {
                debug!(dropped, "Batch exceeded log length; oldest entries dropped");
            }
            _ if compaction_attempts > 0 => {
                debug!(
                    attempts = compaction_attempts,
                    "Compaction found no safe truncation point"
                );
            }
            _ => {}
        }
        Ok(update)
    }
}

/// Order a batch by sequence, keeping arrival order among equal sequences
fn sort_changes(batch: &mut [PendingChange]) {
    batch.sort_by_key(|change| change.entry.sequence);
}
