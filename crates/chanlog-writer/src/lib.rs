//! # Chanlog Writer
//!
//! Asynchronous, batching writers that keep one size-bounded change log per
//! channel in a shared document store.
//!
//! A [`ChangesWriter`] receives every document change together with the
//! document's channel map and fans the change out to a [`ChannelLogWriter`]
//! per affected channel (plus the universal `*` channel). Each channel writer
//! owns a bounded mailbox and a background task that drains it in batches,
//! sorts each batch by sequence and appends it to the channel's log document
//! with a compare-and-swap update. Logs are compacted to a configured length
//! with a probability that grows with their stored size.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chanlog_core::{ChannelMap, ChannelSet, LogEntry};
//! use chanlog_storage::MemoryBucket;
//! use chanlog_writer::{ChangesWriter, ChangesWriterConfig};
//!
//! let writer = ChangesWriter::new(Arc::new(MemoryBucket::new()), ChangesWriterConfig::default())?;
//!
//! let mut channels = ChannelMap::new();
//! channels.insert("news".into(), None);
//! writer
//!     .add_to_change_logs(&ChannelSet::new(), &channels, LogEntry::new(1, "doc1", "1-a"), "")
//!     .await?;
//!
//! writer.checkpoint().await?;
//! let log = writer.get_change_log("news", 0).await?;
//! ```

pub mod changes;
pub mod channel_writer;
pub mod config;
pub mod error;
pub mod key;
pub mod policy;

pub use changes::ChangesWriter;
pub use channel_writer::{ChannelLogWriter, PendingChange, WriterReport};
pub use config::ChangesWriterConfig;
pub use error::{WriterError, WriterResult};
pub use key::channel_log_key;
pub use policy::{CompactionPolicy, LogUpdate};
