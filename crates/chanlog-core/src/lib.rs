//! # Chanlog Core
//!
//! Core types, the decoded channel-log model and the channel-log byte
//! encoding shared by the chanlog crates.
//!
//! ## Key Types
//!
//! - [`LogEntry`]: One visibility change of a document revision in a channel
//! - [`EntryFlags`]: Bitmask carried by every entry (`DELETED`, `REMOVED`, `HIDDEN`)
//! - [`ChannelMap`]: A document's channel membership, with removal markers
//! - [`ChangeLog`]: A decoded channel log
//!
//! ## Encoding
//!
//! The [`encoding`] module defines the stored form of a channel log: a
//! header followed by self-delimiting entry records. New records can be
//! concatenated onto existing valid bytes, and [`encoding::truncate_encoded`]
//! drops the oldest records when a log is compacted.

pub mod change_log;
pub mod channel;
pub mod encoding;
pub mod entry;
pub mod error;

pub use change_log::ChangeLog;
pub use channel::{ChannelMap, ChannelRemoval, ChannelSet, STAR_CHANNEL};
pub use encoding::{DecodedLog, EncodedEntry, Truncation};
pub use entry::{EntryFlags, LogEntry};
pub use error::EncodingError;
