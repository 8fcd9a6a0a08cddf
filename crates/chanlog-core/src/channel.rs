//! Channel membership types

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Name of the universal channel that receives every change
pub const STAR_CHANNEL: &str = "*";

/// Marks that a document left a channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRemoval {
    /// Sequence of the change that removed the document
    pub seq: u64,
    /// Revision that removed the document
    pub rev_id: String,
}

impl ChannelRemoval {
    pub fn new(seq: u64, rev_id: impl Into<String>) -> Self {
        Self {
            seq,
            rev_id: rev_id.into(),
        }
    }

    /// Whether this removal happened in the change at `sequence`
    ///
    /// A removal recorded for an earlier change is stale: the document was
    /// already out of the channel, so the current change does not touch it.
    pub fn is_current(&self, sequence: u64) -> bool {
        self.seq == sequence
    }
}

/// A document's channels, each with an optional removal marker
pub type ChannelMap = BTreeMap<String, Option<ChannelRemoval>>;

/// A set of channel names
pub type ChannelSet = BTreeSet<String>;
