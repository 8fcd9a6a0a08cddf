//! Stress tests for chanlog-storage
//!
//! These tests verify that optimistic updates never lose writes when many
//! tasks update the same document at once.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chanlog_storage::{Bucket, MemoryBucket, WriteOptions};

// ============================================================================
// Concurrent Update Tests
// ============================================================================

/// Many tasks append one byte each to the same document
///
/// Every append must land exactly once even though most attempts conflict.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_lose_nothing() {
    let bucket = Arc::new(MemoryBucket::new().with_max_update_attempts(10_000));
    let tasks: usize = 16;
    let appends_per_task: usize = 50;

    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..tasks {
        let bucket = Arc::clone(&bucket);
        handles.push(tokio::spawn(async move {
            for _ in 0..appends_per_task {
                bucket
                    .write_update("shared", 0, &mut |current: &[u8]| {
                        let mut next = current.to_vec();
                        next.push(t as u8);
                        Ok((Bytes::from(next), WriteOptions::raw()))
                    })
                    .await
                    .expect("update failed");
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let duration = start.elapsed();
    let stats = bucket.stats();
    println!(
        "{} appends in {:?}, {} attempts, {} conflicts",
        tasks * appends_per_task,
        duration,
        stats.update_attempts,
        stats.conflicts
    );

    let value = bucket.get_raw("shared").await.unwrap();
    assert_eq!(value.len(), tasks * appends_per_task);
    for t in 0..tasks {
        let count = value.iter().filter(|&&b| b == t as u8).count();
        assert_eq!(count, appends_per_task, "task {} lost writes", t);
    }
    assert_eq!(stats.update_calls, (tasks * appends_per_task) as u64);
    assert_eq!(stats.update_attempts, stats.update_calls + stats.conflicts);
    assert_eq!(stats.failed_updates, 0);
}

/// Racing add_raw calls: exactly one wins
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_raw_single_winner() {
    let bucket = Arc::new(MemoryBucket::new());

    let mut handles = Vec::new();
    for i in 0..32u8 {
        let bucket = Arc::clone(&bucket);
        handles.push(tokio::spawn(async move {
            bucket.add_raw("seed", 0, Bytes::from(vec![i])).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(bucket.get_raw("seed").await.unwrap().len(), 1);
}

/// An outside writer replacing the document mid-stream is never overwritten blindly
#[tokio::test]
async fn test_updates_build_on_external_writes() {
    let bucket = MemoryBucket::new();

    for round in 0..10u8 {
        bucket.set_raw("doc", Bytes::from(vec![round; 2]));
        bucket
            .write_update("doc", 0, &mut |current: &[u8]| {
                let mut next = current.to_vec();
                next.push(0xff);
                Ok((Bytes::from(next), WriteOptions::raw()))
            })
            .await
            .unwrap();
        assert_eq!(
            bucket.get_raw("doc").await.unwrap(),
            Bytes::from(vec![round, round, 0xff])
        );
    }
}
