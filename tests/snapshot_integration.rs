//! Snapshot persistence integration tests
//!
//! A store written to disk and reopened must carry every queue, job record,
//! pause flag and id counter across the restart.

mod common;

use common::{engine_over, manual_engine};
use jobqueue::queue::api::{
    handler_fn, HandlerError, JobOptionsOverride, JobState, MemoryJobStore, StoreError,
};
use serde_json::json;
use std::sync::Arc;

const QUEUE: &str = "invoices";
const TYPE: &str = "render-invoice";

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let engine = manual_engine();
    engine
        .manager
        .register_handler(QUEUE, TYPE, 1, handler_fn(|ctx| async move {
            if ctx.payload()["fail"] == true {
                return Err(HandlerError::new("template missing"));
            }
            Ok(json!({ "pages": 2 }))
        }))
        .unwrap();

    let done = engine.manager.enqueue(QUEUE, TYPE, json!({ "fail": false }), None).await.unwrap();
    let broken = engine
        .manager
        .enqueue(QUEUE, TYPE, json!({ "fail": true }), Some(JobOptionsOverride::new().max_attempts(1)))
        .await
        .unwrap();
    engine.manager.process_next(QUEUE, TYPE).await.unwrap();
    engine.manager.process_next(QUEUE, TYPE).await.unwrap();
    let later = engine
        .manager
        .enqueue(QUEUE, TYPE, json!({ "fail": false }), Some(JobOptionsOverride::new().delay_ms(30_000)))
        .await
        .unwrap();
    engine.manager.pause_queue(QUEUE).await.unwrap();
    engine.store.save_snapshot(&path).await.unwrap();

    let clock = engine.clock.clone();
    let reopened = MemoryJobStore::open(&path, Arc::new(clock.clone())).await.unwrap();
    let restarted = engine_over(Arc::new(reopened), clock);

    let status = restarted.manager.get_queue_status(QUEUE).await.unwrap();
    assert!(status.paused);
    assert_eq!(status.counts.get(JobState::Completed), 1);
    assert_eq!(status.counts.get(JobState::Failed), 1);
    assert_eq!(status.counts.get(JobState::Delayed), 1);

    let completed = restarted.manager.get_job_status(QUEUE, done.id).await.unwrap().unwrap();
    assert_eq!(completed.result, Some(json!({ "pages": 2 })));
    let failed = restarted.manager.get_job_status(QUEUE, broken.id).await.unwrap().unwrap();
    assert_eq!(failed.failure_reason.as_deref(), Some("template missing"));
    let delayed = restarted.manager.get_job_status(QUEUE, later.id).await.unwrap().unwrap();
    assert_eq!(delayed.delay_ms, 30_000);

    // Ids continue after the restored counter
    let next = restarted.manager.enqueue(QUEUE, TYPE, json!({}), None).await.unwrap();
    assert_eq!(next.id, later.id + 1);
}

#[tokio::test]
async fn test_missing_snapshot_opens_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryJobStore::open(&dir.path().join("absent.json"), Arc::new(
        jobqueue::core::time::ManualTimeProvider::new(),
    ))
    .await
    .unwrap();
    assert!(store.snapshot().unwrap().queues.is_empty());
}

#[tokio::test]
async fn test_snapshot_from_other_format_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let engine = manual_engine();
    engine.manager.enqueue(QUEUE, TYPE, json!({}), None).await.unwrap();
    engine.store.save_snapshot(&path).await.unwrap();

    let mut document: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    document["formatVersion"] = json!(1);
    std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

    let result = MemoryJobStore::open(&path, Arc::new(engine.clock.clone())).await;
    assert!(matches!(result, Err(StoreError::FormatMismatch { found: 1, .. })));
}

#[tokio::test]
async fn test_corrupt_snapshot_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let result = MemoryJobStore::open(&path, Arc::new(jobqueue::core::time::ManualTimeProvider::new())).await;
    assert!(matches!(result, Err(StoreError::Serialization(_))));
}
