//! # Chanlog Storage
//!
//! The key-value store contract that channel logs are written through.
//!
//! ## Features
//!
//! - **Bucket trait**: raw reads, add-if-absent writes and optimistic
//!   read-modify-write updates
//! - **MemoryBucket**: DashMap-backed implementation with per-document CAS,
//!   plus conflict and failure injection for tests and simulation
//!
//! ## Example
//!
//! ```rust,ignore
//! use bytes::Bytes;
//! use chanlog_storage::{Bucket, MemoryBucket, WriteOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bucket = MemoryBucket::new();
//!
//!     bucket.add_raw("greeting", 0, Bytes::from_static(b"hello")).await.unwrap();
//!
//!     bucket
//!         .write_update("greeting", 0, &mut |current: &[u8]| {
//!             let mut next = current.to_vec();
//!             next.extend_from_slice(b", world");
//!             Ok((Bytes::from(next), WriteOptions::raw()))
//!         })
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod error;
pub mod memory;

// Re-exports
pub use error::BucketError;
pub use memory::{BucketStats, MemoryBucket};

use async_trait::async_trait;
use bytes::Bytes;

/// How a bucket should store a value produced by an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Store the bytes as an opaque blob rather than a JSON document
    pub raw: bool,
    /// Wait for the write to reach durable storage before returning
    pub persist: bool,
}

impl WriteOptions {
    /// Opaque bytes, no durability wait
    pub const fn raw() -> Self {
        Self {
            raw: true,
            persist: false,
        }
    }

    /// Request a durable write
    pub const fn persisted(mut self) -> Self {
        self.persist = true;
        self
    }
}

/// Callback used by [`Bucket::write_update`]
///
/// Receives the document's current bytes (empty if it does not exist) and
/// returns the bytes to store. It may run several times for one update, so
/// its result must depend only on its input.
pub type UpdateFn<'a> = dyn FnMut(&[u8]) -> Result<(Bytes, WriteOptions), BucketError> + Send + 'a;

/// A key-value store holding opaque documents
///
/// Implementations are shared between many writers, including writers in
/// other processes, so no caller may assume it owns a document.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Read a document
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::NotFound`] if the key has never been written.
    async fn get_raw(&self, key: &str) -> Result<Bytes, BucketError>;

    /// Store a document only if the key does not exist yet
    ///
    /// Returns `Ok(false)` without writing when the key already exists.
    ///
    /// # Arguments
    ///
    /// * `key` - The document key
    /// * `expiry` - Expiration in seconds, 0 for none
    /// * `value` - The bytes to store
    async fn add_raw(&self, key: &str, expiry: u32, value: Bytes) -> Result<bool, BucketError>;

    /// Atomically replace a document with the output of `update`
    ///
    /// The bucket reads the current value, calls `update`, and writes the
    /// result only if the document is unchanged since the read. On a
    /// conflict it reads again and calls `update` again, until a write
    /// succeeds or a terminal error occurs.
    ///
    /// # Errors
    ///
    /// Returns the callback's error unchanged, or
    /// [`BucketError::RetriesExhausted`] when conflicts never clear.
    async fn write_update(
        &self,
        key: &str,
        expiry: u32,
        update: &mut UpdateFn<'_>,
    ) -> Result<(), BucketError>;
}
