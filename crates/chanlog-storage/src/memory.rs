//! In-memory bucket
//!
//! [`MemoryBucket`] keeps documents in a `DashMap` and gives every stored
//! version a CAS token, so [`Bucket::write_update`] behaves like a real
//! optimistic store: concurrent updates to one document conflict and are
//! retried. Conflicts and write failures can be injected per key to drive
//! the retry paths in tests and simulation.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace, warn};

use crate::error::BucketError;
use crate::{Bucket, UpdateFn, WriteOptions};

/// Default number of times an update is attempted before giving up
pub const DEFAULT_MAX_UPDATE_ATTEMPTS: usize = 64;

#[derive(Debug, Clone)]
struct StoredDoc {
    value: Bytes,
    cas: u64,
    #[allow(dead_code)] // recorded, not enforced
    expiry: u32,
    options: WriteOptions,
}

/// Counters describing the work a [`MemoryBucket`] has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketStats {
    /// Calls to `write_update`
    pub update_calls: u64,
    /// Times an update callback was invoked
    pub update_attempts: u64,
    /// Attempts that lost a CAS race
    pub conflicts: u64,
    /// `write_update` calls that ended in an error
    pub failed_updates: u64,
}

/// In-memory implementation of [`Bucket`]
#[derive(Debug)]
pub struct MemoryBucket {
    docs: DashMap<String, StoredDoc>,
    next_cas: AtomicU64,
    max_update_attempts: usize,
    injected_conflicts: DashMap<String, usize>,
    injected_failures: DashMap<String, usize>,
    update_calls: AtomicU64,
    update_attempts: AtomicU64,
    conflicts: AtomicU64,
    failed_updates: AtomicU64,
}

impl Default for MemoryBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBucket {
    /// Create an empty bucket
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            next_cas: AtomicU64::new(1),
            max_update_attempts: DEFAULT_MAX_UPDATE_ATTEMPTS,
            injected_conflicts: DashMap::new(),
            injected_failures: DashMap::new(),
            update_calls: AtomicU64::new(0),
            update_attempts: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            failed_updates: AtomicU64::new(0),
        }
    }

    /// Set how many attempts an update gets before `RetriesExhausted`
    pub fn with_max_update_attempts(mut self, attempts: usize) -> Self {
        self.max_update_attempts = attempts.max(1);
        self
    }

    /// Make the next `count` CAS writes to `key` lose their race
    pub fn inject_conflicts(&self, key: &str, count: usize) {
        *self.injected_conflicts.entry(key.to_string()).or_default() += count;
    }

    /// Make the next `count` `write_update` calls on `key` fail outright
    pub fn inject_failures(&self, key: &str, count: usize) {
        *self.injected_failures.entry(key.to_string()).or_default() += count;
    }

    /// Unconditionally store a document, as an outside writer would
    pub fn set_raw(&self, key: &str, value: Bytes) {
        let cas = self.next_cas();
        self.docs.insert(
            key.to_string(),
            StoredDoc {
                value,
                cas,
                expiry: 0,
                options: WriteOptions::raw(),
            },
        );
    }

    /// Current CAS token of a document
    pub fn cas(&self, key: &str) -> Option<u64> {
        self.docs.get(key).map(|doc| doc.cas)
    }

    /// Options the document was last written with
    pub fn write_options(&self, key: &str) -> Option<WriteOptions> {
        self.docs.get(key).map(|doc| doc.options)
    }

    /// Keys of every stored document, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.docs.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Snapshot of the bucket's counters
    pub fn stats(&self) -> BucketStats {
        BucketStats {
            update_calls: self.update_calls.load(Ordering::SeqCst),
            update_attempts: self.update_attempts.load(Ordering::SeqCst),
            conflicts: self.conflicts.load(Ordering::SeqCst),
            failed_updates: self.failed_updates.load(Ordering::SeqCst),
        }
    }

    fn next_cas(&self) -> u64 {
        self.next_cas.fetch_add(1, Ordering::SeqCst)
    }

    /// Consume one injected event for `key`, if any are pending
    fn take_injected(injected: &DashMap<String, usize>, key: &str) -> bool {
        match injected.get_mut(key) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Store `value` only if the document still has the `expected` CAS
    /// (`None` meaning the document must not exist)
    fn compare_and_store(
        &self,
        key: &str,
        expected: Option<u64>,
        value: Bytes,
        expiry: u32,
        options: WriteOptions,
    ) -> bool {
        let doc = StoredDoc {
            value,
            cas: self.next_cas(),
            expiry,
            options,
        };
        match (self.docs.entry(key.to_string()), expected) {
            (Entry::Occupied(mut occupied), Some(expected)) if occupied.get().cas == expected => {
                occupied.insert(doc);
                true
            }
            (Entry::Vacant(vacant), None) => {
                vacant.insert(doc);
                true
            }
            _ => false,
        }
    }

    async fn run_update(
        &self,
        key: &str,
        expiry: u32,
        update: &mut UpdateFn<'_>,
    ) -> Result<(), BucketError> {
        if Self::take_injected(&self.injected_failures, key) {
            warn!(key, "Injected write failure");
            return Err(BucketError::io(format!("injected failure writing {}", key)));
        }

        for attempt in 1..=self.max_update_attempts {
            self.update_attempts.fetch_add(1, Ordering::SeqCst);

            let (current, cas) = match self.docs.get(key) {
                Some(doc) => (doc.value.clone(), Some(doc.cas)),
                None => (Bytes::new(), None),
            };

            let (value, options) = update(&current[..])?;

            let lost_race = Self::take_injected(&self.injected_conflicts, key)
                || !self.compare_and_store(key, cas, value, expiry, options);
            if !lost_race {
                trace!(key, attempt, "Update stored");
                return Ok(());
            }

            self.conflicts.fetch_add(1, Ordering::SeqCst);
            debug!(key, attempt, "CAS conflict, retrying update");
            tokio::task::yield_now().await;
        }

        Err(BucketError::RetriesExhausted {
            key: key.to_string(),
            attempts: self.max_update_attempts,
        })
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn get_raw(&self, key: &str) -> Result<Bytes, BucketError> {
        self.docs
            .get(key)
            .map(|doc| doc.value.clone())
            .ok_or_else(|| BucketError::not_found(key))
    }

    async fn add_raw(&self, key: &str, expiry: u32, value: Bytes) -> Result<bool, BucketError> {
        let added = match self.docs.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(StoredDoc {
                    value,
                    cas: self.next_cas(),
                    expiry,
                    options: WriteOptions::raw(),
                });
                true
            }
        };
        trace!(key, added, "add_raw");
        Ok(added)
    }

    async fn write_update(
        &self,
        key: &str,
        expiry: u32,
        update: &mut UpdateFn<'_>,
    ) -> Result<(), BucketError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.run_update(key, expiry, update).await;
        if result.is_err() {
            self.failed_updates.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_byte(byte: u8) -> impl FnMut(&[u8]) -> Result<(Bytes, WriteOptions), BucketError> + Send {
        move |current: &[u8]| {
            let mut next = current.to_vec();
            next.push(byte);
            Ok((Bytes::from(next), WriteOptions::raw()))
        }
    }

    #[tokio::test]
    async fn test_get_missing_document() {
        let bucket = MemoryBucket::new();
        let err = bucket.get_raw("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_add_raw_only_when_absent() {
        let bucket = MemoryBucket::new();
        assert!(bucket.add_raw("k", 0, Bytes::from_static(b"first")).await.unwrap());
        assert!(!bucket.add_raw("k", 0, Bytes::from_static(b"second")).await.unwrap());
        assert_eq!(bucket.get_raw("k").await.unwrap(), Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn test_write_update_creates_missing_document() {
        let bucket = MemoryBucket::new();
        let mut seen = Vec::new();
        bucket
            .write_update("k", 0, &mut |current: &[u8]| {
                seen.push(current.to_vec());
                Ok((Bytes::from_static(b"x"), WriteOptions::raw()))
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![Vec::<u8>::new()]);
        assert_eq!(bucket.get_raw("k").await.unwrap(), Bytes::from_static(b"x"));
        assert_eq!(bucket.write_options("k"), Some(WriteOptions::raw()));
    }

    #[tokio::test]
    async fn test_injected_conflicts_rerun_callback() {
        let bucket = MemoryBucket::new();
        bucket.set_raw("k", Bytes::from_static(b"a"));
        bucket.inject_conflicts("k", 3);

        let mut calls = 0;
        let mut append = append_byte(b'b');
        bucket
            .write_update("k", 0, &mut |current: &[u8]| {
                calls += 1;
                append(current)
            })
            .await
            .unwrap();

        assert_eq!(calls, 4);
        assert_eq!(bucket.get_raw("k").await.unwrap(), Bytes::from_static(b"ab"));
        let stats = bucket.stats();
        assert_eq!(stats.update_calls, 1);
        assert_eq!(stats.update_attempts, 4);
        assert_eq!(stats.conflicts, 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let bucket = MemoryBucket::new().with_max_update_attempts(2);
        bucket.inject_conflicts("k", 5);

        let err = bucket
            .write_update("k", 0, &mut append_byte(b'z'))
            .await
            .unwrap_err();
        assert!(matches!(err, BucketError::RetriesExhausted { attempts: 2, .. }));
        assert!(bucket.get_raw("k").await.is_err());
        assert_eq!(bucket.stats().failed_updates, 1);
    }

    #[tokio::test]
    async fn test_injected_failure_skips_callback() {
        let bucket = MemoryBucket::new();
        bucket.inject_failures("k", 1);

        let mut calls = 0;
        let err = bucket
            .write_update("k", 0, &mut |_: &[u8]| {
                calls += 1;
                Ok((Bytes::new(), WriteOptions::raw()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BucketError::Io(_)));
        assert_eq!(calls, 0);

        // Only one failure was injected
        bucket.write_update("k", 0, &mut append_byte(b'1')).await.unwrap();
        assert_eq!(bucket.get_raw("k").await.unwrap(), Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn test_callback_error_is_returned() {
        let bucket = MemoryBucket::new();
        let err = bucket
            .write_update("k", 0, &mut |_: &[u8]| Err(BucketError::update("bad bytes")))
            .await
            .unwrap_err();
        assert!(matches!(err, BucketError::Update(_)));
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_set_raw_changes_cas() {
        let bucket = MemoryBucket::new();
        bucket.set_raw("k", Bytes::from_static(b"1"));
        let first = bucket.cas("k").unwrap();
        bucket.set_raw("k", Bytes::from_static(b"2"));
        assert!(bucket.cas("k").unwrap() > first);
        assert_eq!(bucket.keys(), vec!["k".to_string()]);
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn test_write_options_are_recorded() {
        let bucket = MemoryBucket::new();
        tokio_test::block_on(bucket.write_update("doc", 0, &mut |_: &[u8]| {
            Ok((Bytes::from_static(b"v"), WriteOptions::raw().persisted()))
        }))
        .unwrap();

        let options = bucket.write_options("doc").unwrap();
        assert!(options.raw);
        assert!(options.persist);
        assert_eq!(bucket.stats().update_calls, 1);
    }
}
