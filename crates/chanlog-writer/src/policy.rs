//! Compaction/append decision for one channel-log write
//!
//! [`CompactionPolicy::apply`] runs inside the store's optimistic update
//! callback, so it can run several times for one logical write. It is a
//! pure function of the stored bytes, the batch and the dice roll it is
//! handed; the caller draws the roll.
//!
//! Three outcomes:
//!
//! - **Replace**: the log is empty, or the batch alone fills it. The stored
//!   bytes are discarded and the newest entries of the batch become the log.
//! - **Compact**: sometimes (always, with `always_compact`) the oldest
//!   entries are truncated before the batch is appended. The chance grows
//!   with the stored size: zero up to 20000 bytes, then one percent per
//!   5000 bytes.
//! - **Append**: otherwise, and whenever truncation finds nothing safe to
//!   remove, the batch is encoded and concatenated onto the stored bytes.

use chanlog_core::{EncodingError, encoding};

use crate::channel_writer::PendingChange;
use crate::config::ChangesWriterConfig;

/// Logs at or below this many bytes are never compacted probabilistically
pub const COMPACTION_MIN_BYTES: usize = 20_000;

/// Each this-many bytes of stored log add one percent of compaction chance
pub const COMPACTION_BYTES_PER_PERCENT: usize = 5_000;

/// Dice rolls are drawn uniformly from `0..COMPACTION_ROLL_RANGE`
pub const COMPACTION_ROLL_RANGE: u32 = 100;

/// What a write did to the stored log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogUpdate {
    /// The stored log was discarded and rebuilt from the batch
    Replaced { kept: usize, dropped: usize },
    /// Old entries were truncated, then the batch appended
    Compacted { removed: usize, appended: usize },
    /// The batch was appended to the stored bytes
    Appended {
        appended: usize,
        compaction_attempted: bool,
    },
}

impl LogUpdate {
    /// Whether this write tried to truncate the stored log
    pub fn compaction_attempted(&self) -> bool {
        match self {
            LogUpdate::Replaced { .. } => false,
            LogUpdate::Compacted { .. } => true,
            LogUpdate::Appended {
                compaction_attempted,
                ..
            } => *compaction_attempted,
        }
    }
}

/// Size-bounding policy for channel logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Entries a log is compacted down to
    pub max_log_length: usize,
    /// Try to compact on every write
    pub always_compact: bool,
}

impl CompactionPolicy {
    pub fn new(max_log_length: usize, always_compact: bool) -> Self {
        Self {
            max_log_length,
            always_compact,
        }
    }

    pub fn from_config(config: &ChangesWriterConfig) -> Self {
        Self::new(config.max_channel_log_length, config.always_compact)
    }

    /// Whether a write against `current_len` stored bytes should try to
    /// compact, given a roll in `0..COMPACTION_ROLL_RANGE`
    pub fn wants_compaction(&self, current_len: usize, roll: u32) -> bool {
        self.always_compact
            || (current_len > COMPACTION_MIN_BYTES
                && (roll as usize) < current_len / COMPACTION_BYTES_PER_PERCENT)
    }

    /// Chance that a write against `current_len` bytes tries to compact
    pub fn compaction_probability(&self, current_len: usize) -> f64 {
        if self.always_compact {
            return 1.0;
        }
        if current_len <= COMPACTION_MIN_BYTES {
            return 0.0;
        }
        let percent = (current_len / COMPACTION_BYTES_PER_PERCENT).min(COMPACTION_ROLL_RANGE as usize);
        percent as f64 / COMPACTION_ROLL_RANGE as f64
    }

    /// Compute the new stored bytes for appending `batch` to `current`
    ///
    /// `batch` must be non-empty and sorted by sequence.
    pub fn apply(
        &self,
        current: &[u8],
        batch: &[PendingChange],
        roll: u32,
    ) -> Result<(Vec<u8>, LogUpdate), EncodingError> {
        let num_to_keep = self.max_log_length as i64 - batch.len() as i64;

        if current.is_empty() || num_to_keep <= 0 {
            let dropped = (-num_to_keep).max(0) as usize;
            let (discarded, kept) = batch.split_at(dropped.min(batch.len()));

            let mut since = discarded.iter().map(|c| c.entry.sequence).max().unwrap_or(0);
            if !current.is_empty() {
                // The stored log is thrown away even if unreadable
                since = since.max(encoding::max_sequence(current).unwrap_or(0));
            }

            let bytes = encoding::encode_log(
                since,
                kept.iter().map(|c| (&c.entry, c.parent_rev_id.as_str())),
            )?;
            return Ok((
                bytes,
                LogUpdate::Replaced {
                    kept: kept.len(),
                    dropped,
                },
            ));
        }

        let num_to_keep = num_to_keep as usize;
        let compaction_attempted = self.wants_compaction(current.len(), roll);
        if compaction_attempted {
            let truncation = encoding::truncate_encoded(current, num_to_keep, num_to_keep / 2)?;
            if truncation.removed > 0 {
                let mut bytes = truncation.bytes;
                append_batch(&mut bytes, batch)?;
                return Ok((
                    bytes,
                    LogUpdate::Compacted {
                        removed: truncation.removed,
                        appended: batch.len(),
                    },
                ));
            }
        }

        let mut bytes = Vec::with_capacity(current.len() + batch.len() * 48);
        bytes.extend_from_slice(current);
        append_batch(&mut bytes, batch)?;
        Ok((
            bytes,
            LogUpdate::Appended {
                appended: batch.len(),
                compaction_attempted,
            },
        ))
    }
}

fn append_batch(out: &mut Vec<u8>, batch: &[PendingChange]) -> Result<(), EncodingError> {
    for change in batch {
        encoding::encode_entry(&change.entry, &change.parent_rev_id, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanlog_core::{ChangeLog, LogEntry};
    use rand::Rng;

    fn change(seq: u64) -> PendingChange {
        PendingChange::new(LogEntry::new(seq, format!("doc-{:05}", seq), "1-abcdef"), "")
    }

    fn batch(seqs: impl IntoIterator<Item = u64>) -> Vec<PendingChange> {
        seqs.into_iter().map(change).collect()
    }

    fn stored(seqs: impl IntoIterator<Item = u64>) -> Vec<u8> {
        let changes = batch(seqs);
        encoding::encode_log(0, changes.iter().map(|c| (&c.entry, ""))).unwrap()
    }

    fn seqs(raw: &[u8]) -> Vec<u64> {
        ChangeLog::decode(raw)
            .unwrap()
            .entries()
            .iter()
            .map(|e| e.sequence)
            .collect()
    }

    #[test]
    fn test_empty_log_is_replaced_by_batch() {
        let policy = CompactionPolicy::new(10, false);
        let (bytes, update) = policy.apply(&[], &batch([1, 2, 3]), 0).unwrap();
        assert_eq!(update, LogUpdate::Replaced { kept: 3, dropped: 0 });
        assert_eq!(seqs(&bytes), vec![1, 2, 3]);
        assert_eq!(ChangeLog::decode(&bytes).unwrap().since, 0);
    }

    #[test]
    fn test_oversized_batch_keeps_most_recent() {
        let policy = CompactionPolicy::new(5, false);
        let (bytes, update) = policy.apply(&[], &batch(1..=7), 0).unwrap();
        assert_eq!(update, LogUpdate::Replaced { kept: 5, dropped: 2 });
        assert_eq!(seqs(&bytes), vec![3, 4, 5, 6, 7]);
        assert_eq!(ChangeLog::decode(&bytes).unwrap().since, 2);
    }

    #[test]
    fn test_batch_filling_log_discards_stored_entries() {
        let policy = CompactionPolicy::new(3, false);
        let current = stored([1, 2]);
        let (bytes, update) = policy.apply(&current, &batch([10, 11, 12]), 99).unwrap();
        assert_eq!(update, LogUpdate::Replaced { kept: 3, dropped: 0 });
        assert_eq!(seqs(&bytes), vec![10, 11, 12]);
        assert_eq!(ChangeLog::decode(&bytes).unwrap().since, 2);
    }

    #[test]
    fn test_replacement_keeps_parent_revisions() {
        let policy = CompactionPolicy::new(10, false);
        let changes = vec![PendingChange::new(LogEntry::new(4, "doc", "2-b"), "1-a")];
        let (bytes, _) = policy.apply(&[], &changes, 0).unwrap();
        let decoded = encoding::decode_records(&bytes).unwrap();
        assert_eq!(decoded.entries[0].parent_rev_id, "1-a");
    }

    #[test]
    fn test_small_log_appends() {
        let policy = CompactionPolicy::new(10, false);
        let current = stored([1, 2, 3]);
        let (bytes, update) = policy.apply(&current, &batch([4, 5]), 0).unwrap();
        assert_eq!(
            update,
            LogUpdate::Appended {
                appended: 2,
                compaction_attempted: false
            }
        );
        assert!(bytes.starts_with(&current));
        assert_eq!(seqs(&bytes), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_always_compact_truncates_then_appends() {
        let policy = CompactionPolicy::new(5, true);
        let current = stored(1..=8);
        let (bytes, update) = policy.apply(&current, &batch([9, 10]), 99).unwrap();
        assert_eq!(
            update,
            LogUpdate::Compacted {
                removed: 5,
                appended: 2
            }
        );
        assert_eq!(seqs(&bytes), vec![6, 7, 8, 9, 10]);
        assert_eq!(ChangeLog::decode(&bytes).unwrap().since, 5);
    }

    #[test]
    fn test_compaction_without_safe_cut_falls_back_to_append() {
        let policy = CompactionPolicy::new(4, true);
        // Every cut would strand sequence 1 behind 100.
        let current = stored([100, 1, 2, 3, 4]);
        let (bytes, update) = policy.apply(&current, &batch([101]), 0).unwrap();
        assert_eq!(
            update,
            LogUpdate::Appended {
                appended: 1,
                compaction_attempted: true
            }
        );
        assert_eq!(seqs(&bytes), vec![100, 1, 2, 3, 4, 101]);
    }

    #[test]
    fn test_compaction_needs_more_entries_than_kept() {
        let policy = CompactionPolicy::new(10, true);
        let current = stored([1, 2, 3]);
        let (_, update) = policy.apply(&current, &batch([4]), 0).unwrap();
        assert!(matches!(update, LogUpdate::Appended { compaction_attempted: true, .. }));
    }

    #[test]
    fn test_wants_compaction_thresholds() {
        let policy = CompactionPolicy::new(500, false);
        assert!(!policy.wants_compaction(0, 0));
        assert!(!policy.wants_compaction(COMPACTION_MIN_BYTES, 0));

        // 20001 bytes: 4 percent
        assert!(policy.wants_compaction(20_001, 3));
        assert!(!policy.wants_compaction(20_001, 4));

        // 25000 bytes: 5 percent
        assert!(policy.wants_compaction(25_000, 4));
        assert!(!policy.wants_compaction(25_000, 5));

        // 500000 bytes and up: always
        assert!(policy.wants_compaction(500_000, 99));

        assert!(CompactionPolicy::new(500, true).wants_compaction(0, 99));
    }

    #[test]
    fn test_compaction_probability() {
        let policy = CompactionPolicy::new(500, false);
        assert_eq!(policy.compaction_probability(10_000), 0.0);
        assert_eq!(policy.compaction_probability(25_000), 0.05);
        assert_eq!(policy.compaction_probability(10_000_000), 1.0);
        assert_eq!(CompactionPolicy::new(500, true).compaction_probability(0), 1.0);
    }

    #[test]
    fn test_apply_is_repeatable() {
        let policy = CompactionPolicy::new(50, false);
        let current = stored(1..=20);
        let changes = batch([21, 22]);
        let first = policy.apply(&current, &changes, 42).unwrap();
        let second = policy.apply(&current, &changes, 42).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_compaction_rate_tracks_document_size() {
        let policy = CompactionPolicy::new(500, false);
        let mut seq = 0;
        let mut current = stored([]);
        while current.len() < 25_000 {
            seq += 1;
            encoding::encode_entry(&change(seq).entry, "", &mut current).unwrap();
        }
        assert!(seq > 500, "log must hold more entries than are kept");

        let expected = policy.compaction_probability(current.len());
        let trials = 4000;
        let next = batch([seq + 1]);
        let mut rng = rand::rng();
        let mut compactions = 0;
        for _ in 0..trials {
            let roll = rng.random_range(0..COMPACTION_ROLL_RANGE);
            let (_, update) = policy.apply(&current, &next, roll).unwrap();
            if matches!(update, LogUpdate::Compacted { .. }) {
                compactions += 1;
            }
        }

        let observed = compactions as f64 / trials as f64;
        assert!(
            (observed - expected).abs() < 0.02,
            "observed {:.3}, expected {:.3}",
            observed,
            expected
        );
    }
}
