//! Shared fixtures for the engine tests

use crate::core::time::ManualTimeProvider;
use crate::notifications::api::{Event, EventReceiver, JobEventType};
use crate::queue::api::{
    handler_fn, EngineConfig, HandlerError, Job, JobHandler, JobId, JobMutation, JobState,
    JobStore, MemoryJobStore, QueueCounts, QueueManager, QueueMeta, StoreError, StoreResult,
    UpdateResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) const QUEUE: &str = "reports";
pub(crate) const TYPE: &str = "build-report";

pub(crate) struct Harness {
    pub manager: Arc<QueueManager>,
    pub store: Arc<MemoryJobStore>,
    pub clock: ManualTimeProvider,
}

/// Short intervals so running engines react within a few milliseconds
pub(crate) fn fast_config() -> EngineConfig {
    EngineConfig {
        tick_interval: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
        drain_timeout: Duration::from_secs(2),
        ..EngineConfig::default()
    }
}

pub(crate) fn harness() -> Harness {
    harness_with(fast_config())
}

pub(crate) fn harness_with(config: EngineConfig) -> Harness {
    let clock = ManualTimeProvider::new();
    let store = Arc::new(MemoryJobStore::with_clock(Arc::new(clock.clone())));
    let manager = Arc::new(QueueManager::with_store(
        config,
        store.clone(),
        Arc::new(clock.clone()),
    ));
    Harness {
        manager,
        store,
        clock,
    }
}

/// Second engine over the same store and clock, as a separate process would be
pub(crate) fn sibling(harness: &Harness, config: EngineConfig) -> Arc<QueueManager> {
    Arc::new(QueueManager::with_store(
        config,
        harness.store.clone(),
        Arc::new(harness.clock.clone()),
    ))
}

/// Store whose counts fail for one queue and delegate everything else
pub(crate) struct BrokenCountsStore {
    pub inner: Arc<MemoryJobStore>,
    pub broken: String,
}

#[async_trait]
impl JobStore for BrokenCountsStore {
    async fn next_job_id(&self, queue: &str) -> StoreResult<JobId> {
        self.inner.next_job_id(queue).await
    }

    async fn persist(&self, job: Job) -> StoreResult<()> {
        self.inner.persist(job).await
    }

    async fn claim_next_ready(
        &self,
        queue: &str,
        type_name: &str,
        lock_duration: Duration,
    ) -> StoreResult<Option<Job>> {
        self.inner.claim_next_ready(queue, type_name, lock_duration).await
    }

    async fn get(&self, queue: &str, id: JobId) -> StoreResult<Option<Job>> {
        self.inner.get(queue, id).await
    }

    async fn update(
        &self,
        queue: &str,
        id: JobId,
        mutation: JobMutation,
    ) -> StoreResult<UpdateResult> {
        self.inner.update(queue, id, mutation).await
    }

    async fn list_by_state(
        &self,
        queue: &str,
        state: JobState,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Job>> {
        self.inner.list_by_state(queue, state, limit).await
    }

    async fn remove(&self, queue: &str, id: JobId) -> StoreResult<Option<Job>> {
        self.inner.remove(queue, id).await
    }

    async fn remove_by_state_before(
        &self,
        queue: &str,
        state: JobState,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Job>> {
        self.inner.remove_by_state_before(queue, state, cutoff).await
    }

    async fn trim_state(&self, queue: &str, state: JobState, keep: usize) -> StoreResult<Vec<Job>> {
        self.inner.trim_state(queue, state, keep).await
    }

    async fn remove_all(&self, queue: &str) -> StoreResult<usize> {
        self.inner.remove_all(queue).await
    }

    async fn counts(&self, queue: &str) -> StoreResult<QueueCounts> {
        if queue == self.broken {
            return Err(StoreError::Unavailable(format!("counts for {} offline", queue)));
        }
        self.inner.counts(queue).await
    }

    async fn queue_meta(&self, queue: &str) -> StoreResult<Option<QueueMeta>> {
        self.inner.queue_meta(queue).await
    }

    async fn save_queue_meta(&self, meta: QueueMeta) -> StoreResult<()> {
        self.inner.save_queue_meta(meta).await
    }

    async fn queue_names(&self) -> StoreResult<Vec<String>> {
        self.inner.queue_names().await
    }
}

/// Reports full progress and echoes the job id
pub(crate) fn ok_handler() -> Arc<dyn JobHandler> {
    handler_fn(|ctx| async move {
        ctx.progress(100)
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;
        Ok(json!({ "handled": ctx.id() }))
    })
}

pub(crate) fn failing_handler(message: &'static str) -> Arc<dyn JobHandler> {
    handler_fn(move |_ctx| async move { Err::<Value, _>(HandlerError::new(message)) })
}

pub(crate) fn report_payload() -> Value {
    json!({ "report": "weekly", "format": "pdf" })
}

/// Poll the queue counts until `predicate` holds or five seconds pass
pub(crate) async fn wait_for_counts<F>(manager: &QueueManager, queue: &str, predicate: F) -> QueueCounts
where
    F: Fn(&QueueCounts) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let counts = manager
            .get_queue_status(queue)
            .await
            .expect("queue status")
            .counts;
        if predicate(&counts) {
            return counts;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting on \"{}\" queue, last counts {:?}",
            queue,
            counts
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Job events received so far, in order
pub(crate) fn job_events(rx: &mut EventReceiver) -> Vec<(JobEventType, JobId)> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::Job(job_event) = event {
            events.push((job_event.event_type, job_event.job_id));
        }
    }
    events
}

pub(crate) fn count_of(events: &[(JobEventType, JobId)], kind: JobEventType) -> usize {
    events.iter().filter(|(event_type, _)| *event_type == kind).count()
}
