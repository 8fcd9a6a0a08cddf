//! Channel-log entries

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bitmask of per-entry flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryFlags(u8);

impl EntryFlags {
    /// The revision is a deletion (tombstone)
    pub const DELETED: EntryFlags = EntryFlags(1);
    /// The document left the channel as of this entry's sequence
    pub const REMOVED: EntryFlags = EntryFlags(1 << 1);
    /// The revision is not the document's current revision
    pub const HIDDEN: EntryFlags = EntryFlags(1 << 2);

    /// Union of every known flag
    pub const ALL: EntryFlags = EntryFlags(0b111);

    /// No flags set
    pub const fn empty() -> Self {
        EntryFlags(0)
    }

    /// Build from raw bits, rejecting unknown bits
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 == 0 {
            Some(EntryFlags(bits))
        } else {
            None
        }
    }

    /// Raw bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: EntryFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EntryFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: EntryFlags) {
        self.0 &= !other.0;
    }

    /// Set or clear `other` depending on `value`
    pub fn set(&mut self, other: EntryFlags, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for EntryFlags {
    type Output = EntryFlags;

    fn bitor(self, rhs: EntryFlags) -> EntryFlags {
        EntryFlags(self.0 | rhs.0)
    }
}

/// A single change record in a channel log
///
/// Reads as: document `doc_id` at revision `rev_id` became visible (or, with
/// [`EntryFlags::REMOVED`], invisible) in the channel as of `sequence`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogEntry {
    /// Change sequence; ordering key and read cursor. Not required to be gapless.
    pub sequence: u64,
    /// Document identifier
    pub doc_id: String,
    /// Revision identifier
    pub rev_id: String,
    /// Entry flags
    pub flags: EntryFlags,
}

impl LogEntry {
    /// Create a new entry with no flags set
    pub fn new(sequence: u64, doc_id: impl Into<String>, rev_id: impl Into<String>) -> Self {
        Self {
            sequence,
            doc_id: doc_id.into(),
            rev_id: rev_id.into(),
            flags: EntryFlags::empty(),
        }
    }

    /// Set flags on the entry
    pub fn with_flags(mut self, flags: EntryFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether the entry records a removal from the channel
    pub fn is_removed(&self) -> bool {
        self.flags.contains(EntryFlags::REMOVED)
    }

    /// Whether the entry's revision is a deletion
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(EntryFlags::DELETED)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {:?}/{:?}", self.sequence, self.doc_id, self.rev_id)?;
        if !self.flags.is_empty() {
            write!(f, " flags={:#x}", self.flags.bits())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_set_and_clear() {
        let mut flags = EntryFlags::DELETED;
        flags.set(EntryFlags::REMOVED, true);
        assert!(flags.contains(EntryFlags::REMOVED));
        assert!(flags.contains(EntryFlags::DELETED));

        flags.set(EntryFlags::REMOVED, false);
        assert!(!flags.contains(EntryFlags::REMOVED));
        assert_eq!(flags, EntryFlags::DELETED);
    }

    #[test]
    fn test_flags_from_bits_rejects_unknown() {
        assert_eq!(EntryFlags::from_bits(7), Some(EntryFlags::ALL));
        assert!(EntryFlags::from_bits(8).is_none());
        assert!(EntryFlags::from_bits(0xff).is_none());
    }

    #[test]
    fn test_entry_display() {
        let entry = LogEntry::new(12, "doc", "1-a").with_flags(EntryFlags::REMOVED);
        assert_eq!(entry.to_string(), "#12 \"doc\"/\"1-a\" flags=0x2");
        assert!(entry.is_removed());
        assert!(!entry.is_deleted());
    }
}
