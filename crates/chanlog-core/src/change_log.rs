//! Decoded channel logs

use std::collections::HashMap;

use crate::encoding::{self, EncodedEntry};
use crate::entry::LogEntry;
use crate::error::EncodingError;

/// An in-memory channel log
///
/// Entries are kept in the order they were added or stored, which for logs
/// written by the channel writer is non-decreasing sequence order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLog {
    /// Entries with a sequence `<= since` may be missing from this log
    pub since: u64,
    entries: Vec<LogEntry>,
}

impl ChangeLog {
    /// Create an empty log
    pub fn new(since: u64) -> Self {
        Self {
            since,
            entries: Vec::new(),
        }
    }

    /// Create a log holding `entries`
    pub fn with_entries(since: u64, entries: Vec<LogEntry>) -> Self {
        Self { since, entries }
    }

    /// Append an entry at the end of the log
    pub fn add(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Keep only the entries with a sequence greater than `after_seq`
    pub fn filter_after(&mut self, after_seq: u64) {
        self.entries.retain(|e| e.sequence > after_seq);
        self.since = self.since.max(after_seq);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }

    /// Sequence of the last entry, or `since` for an empty log
    pub fn last_sequence(&self) -> u64 {
        self.entries.last().map_or(self.since, |e| e.sequence)
    }

    /// Whether entry sequences never decrease
    pub fn is_sequence_ordered(&self) -> bool {
        self.entries.windows(2).all(|w| w[0].sequence <= w[1].sequence)
    }

    /// Encode the log in its stored form, without parent revisions
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        encoding::encode_log(self.since, self.entries.iter().map(|e| (e, "")))
    }

    /// Decode a stored log
    ///
    /// An entry is dropped when a later entry for the same document names
    /// its revision as parent: the later revision supersedes it.
    pub fn decode(raw: &[u8]) -> Result<Self, EncodingError> {
        let decoded = encoding::decode_records(raw)?;
        Ok(Self {
            since: decoded.since,
            entries: drop_superseded(decoded.entries),
        })
    }
}

fn drop_superseded(records: Vec<EncodedEntry>) -> Vec<LogEntry> {
    let mut latest: HashMap<(String, String), usize> = HashMap::new();
    let mut superseded = vec![false; records.len()];

    for (i, record) in records.iter().enumerate() {
        let entry = &record.entry;
        if !record.parent_rev_id.is_empty()
            && let Some(&parent) =
                latest.get(&(entry.doc_id.clone(), record.parent_rev_id.clone()))
        {
            superseded[parent] = true;
        }
        latest.insert((entry.doc_id.clone(), entry.rev_id.clone()), i);
    }

    records
        .into_iter()
        .zip(superseded)
        .filter(|(_, dropped)| !dropped)
        .map(|(record, _)| record.entry)
        .collect()
}
