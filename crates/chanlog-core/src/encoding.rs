//! Channel-log byte encoding
//!
//! A stored channel log is a header followed by zero or more entry records:
//!
//! ```text
//! [since: varint u64][record][record][...]
//! record = [flags: u8][sequence: varint u64][doc_id: str][rev_id: str][parent_rev_id: str]
//! ```
//!
//! Records are postcard-serialized and self-delimiting, so appending a batch
//! is a plain byte concatenation. Every entry whose sequence is `<= since`
//! may have been dropped by an earlier truncation.

use serde::{Deserialize, Serialize};

use crate::entry::{EntryFlags, LogEntry};
use crate::error::EncodingError;

/// Wire form of one record
#[derive(Serialize, Deserialize)]
struct Record<'a> {
    flags: u8,
    sequence: u64,
    doc_id: &'a str,
    rev_id: &'a str,
    parent_rev_id: &'a str,
}

/// A decoded record: the entry plus the revision it replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEntry {
    pub entry: LogEntry,
    /// Parent revision, empty if unknown
    pub parent_rev_id: String,
}

/// All records of a stored log, in stored order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedLog {
    pub since: u64,
    pub entries: Vec<EncodedEntry>,
}

/// Result of [`truncate_encoded`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    /// The rewritten log
    pub bytes: Vec<u8>,
    /// Number of records dropped from the front
    pub removed: usize,
    /// Number of records left
    pub remaining: usize,
}

/// Append the log header to `out`
pub fn encode_header(since: u64, out: &mut Vec<u8>) -> Result<(), EncodingError> {
    out.extend_from_slice(&postcard::to_allocvec(&since)?);
    Ok(())
}

/// Append one entry record to `out`
pub fn encode_entry(
    entry: &LogEntry,
    parent_rev_id: &str,
    out: &mut Vec<u8>,
) -> Result<(), EncodingError> {
    let record = Record {
        flags: entry.flags.bits(),
        sequence: entry.sequence,
        doc_id: &entry.doc_id,
        rev_id: &entry.rev_id,
        parent_rev_id,
    };
    out.extend_from_slice(&postcard::to_allocvec(&record)?);
    Ok(())
}

/// Encode a complete log: header plus one record per `(entry, parent)` pair
pub fn encode_log<'a, I>(since: u64, entries: I) -> Result<Vec<u8>, EncodingError>
where
    I: IntoIterator<Item = (&'a LogEntry, &'a str)>,
{
    let mut out = Vec::new();
    encode_header(since, &mut out)?;
    for (entry, parent) in entries {
        encode_entry(entry, parent, &mut out)?;
    }
    Ok(out)
}

/// Decode every record of a stored log, keeping parent revisions
pub fn decode_records(raw: &[u8]) -> Result<DecodedLog, EncodingError> {
    let mut scanner = Scanner::new(raw)?;
    let mut entries = Vec::new();
    while let Some((_, record)) = scanner.next_record()? {
        entries.push(EncodedEntry {
            entry: LogEntry {
                sequence: record.sequence,
                doc_id: record.doc_id.to_string(),
                rev_id: record.rev_id.to_string(),
                flags: EntryFlags::from_bits(record.flags).unwrap_or_default(),
            },
            parent_rev_id: record.parent_rev_id.to_string(),
        });
    }
    Ok(DecodedLog {
        since: scanner.since,
        entries,
    })
}

/// Largest sequence mentioned by a stored log, header included
pub fn max_sequence(raw: &[u8]) -> Result<u64, EncodingError> {
    let mut scanner = Scanner::new(raw)?;
    let mut max = scanner.since;
    while let Some((_, record)) = scanner.next_record()? {
        max = max.max(record.sequence);
    }
    Ok(max)
}

/// Drop the oldest records of a stored log
///
/// Keeps at most `max_length` records. The removed prefix is chosen so that
/// every removed sequence is lower than every remaining one, which may mean
/// removing more than strictly needed. If no such prefix leaves at least
/// `min_length` records, nothing is removed. The new header's `since` is
/// the largest removed sequence. Remaining records are copied unchanged.
pub fn truncate_encoded(
    raw: &[u8],
    max_length: usize,
    min_length: usize,
) -> Result<Truncation, EncodingError> {
    let mut scanner = Scanner::new(raw)?;
    let mut offsets = Vec::new();
    let mut sequences = Vec::new();
    while let Some((offset, record)) = scanner.next_record()? {
        offsets.push(offset);
        sequences.push(record.sequence);
    }

    let old_length = offsets.len();
    let mut since = scanner.since;
    let mut removed = 0;
    if old_length > max_length {
        let (pivot, max_removed) = find_pivot(&sequences, old_length - max_length - 1);
        if old_length - (pivot + 1) >= min_length {
            removed = pivot + 1;
            since = since.max(max_removed);
        }
    }

    let mut bytes = Vec::with_capacity(raw.len());
    encode_header(since, &mut bytes)?;
    let body_start = offsets.get(removed).copied().unwrap_or(raw.len());
    bytes.extend_from_slice(&raw[body_start..]);

    Ok(Truncation {
        bytes,
        removed,
        remaining: old_length - removed,
    })
}

/// Find the first index at or after `min_index` such that every value up to
/// and including it is lower than every value after it.
///
/// Returns the pivot and the largest value at or before it. Falls back to
/// the last index when no earlier pivot exists.
fn find_pivot(values: &[u64], min_index: usize) -> (usize, u64) {
    let n = values.len();
    let mut min_right = vec![u64::MAX; n];
    let mut min = u64::MAX;
    for i in (0..n).rev() {
        min = min.min(values[i]);
        min_right[i] = min;
    }

    let mut max_before = 0;
    for pivot in 0..n {
        max_before = max_before.max(values[pivot]);
        if pivot + 1 == n || (pivot >= min_index && max_before < min_right[pivot + 1]) {
            return (pivot, max_before);
        }
    }
    (0, 0)
}

/// Walks the records of a stored log
struct Scanner<'a> {
    raw: &'a [u8],
    offset: usize,
    since: u64,
}

impl<'a> Scanner<'a> {
    fn new(raw: &'a [u8]) -> Result<Self, EncodingError> {
        if raw.is_empty() {
            return Err(EncodingError::MissingHeader);
        }
        let (since, rest) = postcard::take_from_bytes::<u64>(raw)
            .map_err(|e| EncodingError::corrupt(0, e.to_string()))?;
        Ok(Self {
            raw,
            offset: raw.len() - rest.len(),
            since,
        })
    }

    fn next_record(&mut self) -> Result<Option<(usize, Record<'a>)>, EncodingError> {
        let raw: &'a [u8] = self.raw;
        let offset = self.offset;
        if offset >= raw.len() {
            return Ok(None);
        }
        let (record, rest) = postcard::take_from_bytes::<Record<'a>>(&raw[offset..])
            .map_err(|e| EncodingError::corrupt(offset, e.to_string()))?;
        if EntryFlags::from_bits(record.flags).is_none() {
            return Err(EncodingError::InvalidFlags {
                offset,
                flags: record.flags,
            });
        }
        self.offset = self.raw.len() - rest.len();
        Ok(Some((offset, record)))
    }
}
