//! Synthetic change feed driven through a [`ChangesWriter`]
//!
//! Producers draw sequence numbers from one shared feed and submit each
//! change before releasing it, so submission order matches sequence order
//! and every resulting channel log must come out sorted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, trace};

use chanlog_core::{ChannelMap, ChannelRemoval, ChannelSet, EntryFlags, LogEntry, STAR_CHANNEL};
use chanlog_storage::{Bucket, MemoryBucket};
use chanlog_writer::{ChangesWriter, channel_log_key};

use crate::config::SimConfig;

/// Most channels a single document belongs to at once
const MAX_CHANNELS_PER_DOC: usize = 3;

/// One channel's log after the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSummary {
    pub name: String,
    pub entries: usize,
    pub bytes: usize,
    pub since: u64,
    pub last_sequence: u64,
    pub ordered: bool,
}

/// Outcome of a simulation
#[derive(Debug, Clone)]
pub struct SimReport {
    pub changes: u64,
    pub elapsed: Duration,
    pub update_calls: u64,
    pub conflicts: u64,
    pub channels: Vec<ChannelSummary>,
}

impl SimReport {
    pub fn all_ordered(&self) -> bool {
        self.channels.iter().all(|c| c.ordered)
    }

    pub fn unordered_channels(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|c| !c.ordered)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSummary> {
        self.channels.iter().find(|c| c.name == name)
    }
}

pub fn channel_name(index: usize) -> String {
    format!("ch-{}", index)
}

#[derive(Default)]
struct Feed {
    last_sequence: u64,
    /// Current revision and generation per document
    revisions: HashMap<String, (u32, String)>,
}

struct SimChange {
    entry: LogEntry,
    parent_rev_id: String,
    channel_map: ChannelMap,
    changed: ChannelSet,
}

/// Run the simulation described by `config` against an in-memory bucket
pub async fn run(config: &SimConfig) -> anyhow::Result<SimReport> {
    config.validate()?;
    let bucket = Arc::new(MemoryBucket::new());
    let writer = Arc::new(ChangesWriter::new(bucket.clone(), config.writer.clone())?);
    let feed = Arc::new(Mutex::new(Feed::default()));
    let config = Arc::new(config.clone());

    info!(
        channels = config.channels,
        docs = config.docs,
        changes = config.changes,
        producers = config.producers,
        "Starting simulation"
    );
    let start = Instant::now();

    let mut producers = JoinSet::new();
    for producer in 0..config.producers {
        producers.spawn(produce(
            producer,
            Arc::clone(&writer),
            Arc::clone(&feed),
            Arc::clone(&config),
        ));
    }
    while let Some(result) = producers.join_next().await {
        result??;
    }
    writer.checkpoint().await?;
    let elapsed = start.elapsed();

    let mut names: Vec<String> = (0..config.channels).map(channel_name).collect();
    if config.writer.enable_star_channel {
        names.push(STAR_CHANNEL.to_string());
    }

    let mut channels = Vec::with_capacity(names.len());
    for name in names {
        let Some(log) = writer.get_change_log(&name, 0).await? else {
            debug!(channel = %name, "Channel never received a change");
            continue;
        };
        let bytes = bucket.get_raw(&channel_log_key(&name)).await?.len();
        channels.push(ChannelSummary {
            entries: log.len(),
            bytes,
            since: log.since,
            last_sequence: log.last_sequence(),
            ordered: log.is_sequence_ordered(),
            name,
        });
    }

    let stats = bucket.stats();
    info!(elapsed_ms = elapsed.as_millis() as u64, "Simulation complete");
    Ok(SimReport {
        changes: config.changes,
        elapsed,
        update_calls: stats.update_calls,
        conflicts: stats.conflicts,
        channels,
    })
}

async fn produce(
    producer: usize,
    writer: Arc<ChangesWriter>,
    feed: Arc<Mutex<Feed>>,
    config: Arc<SimConfig>,
) -> anyhow::Result<()> {
    loop {
        let mut feed = feed.lock().await;
        if feed.last_sequence >= config.changes {
            return Ok(());
        }
        feed.last_sequence += 1;
        let sequence = feed.last_sequence;
        let change = next_change(&mut feed, sequence, &config);

        writer
            .add_to_change_logs(
                &change.changed,
                &change.channel_map,
                change.entry,
                &change.parent_rev_id,
            )
            .await?;
        drop(feed);
        trace!(producer, sequence, "Submitted change");

        // Other producers keep submitting while this one checkpoints
        if config.checkpoint_every > 0 && sequence % config.checkpoint_every == 0 {
            writer.checkpoint().await?;
        }
    }
}

fn next_change(feed: &mut Feed, sequence: u64, config: &SimConfig) -> SimChange {
    let mut rng = rand::rng();

    let doc_id = format!("doc-{}", rng.random_range(0..config.docs));
    let (generation, rev_id) = feed.revisions.entry(doc_id.clone()).or_default();
    let parent_rev_id = std::mem::take(rev_id);
    *generation += 1;
    *rev_id = format!("{}-{:08x}", generation, rng.random::<u32>());
    let rev_id = rev_id.clone();

    let mut channel_map = ChannelMap::new();
    let members = rng.random_range(1..=config.channels.min(MAX_CHANNELS_PER_DOC));
    for _ in 0..members {
        channel_map.insert(channel_name(rng.random_range(0..config.channels)), None);
    }
    let mut changed: ChannelSet = channel_map.keys().cloned().collect();

    if rng.random_bool(config.removal_rate) {
        let name = channel_name(rng.random_range(0..config.channels));
        channel_map.insert(name.clone(), Some(ChannelRemoval::new(sequence, rev_id.clone())));
        changed.insert(name);
    }
    if sequence > 1 && rng.random_bool(config.removal_rate) {
        // Left this channel in an earlier change
        let earlier = rng.random_range(1..sequence);
        channel_map
            .entry(channel_name(rng.random_range(0..config.channels)))
            .or_insert_with(|| Some(ChannelRemoval::new(earlier, "1-stale")));
    }

    let mut flags = EntryFlags::empty();
    if rng.random_bool(config.removal_rate / 2.0) {
        flags.insert(EntryFlags::DELETED);
    }

    SimChange {
        entry: LogEntry::new(sequence, doc_id, rev_id).with_flags(flags),
        parent_rev_id,
        channel_map,
        changed,
    }
}
