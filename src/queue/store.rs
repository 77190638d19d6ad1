//! Job persistence abstraction
//!
//! Every method is one atomic primitive: implementations must guarantee that
//! no other store call observes a partially applied operation. The engine
//! never caches job state between calls; the store is the source of truth.

use crate::queue::error::StoreResult;
use crate::queue::job::{Job, JobId, JobState, QueueCounts, QueueMeta};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Read-modify-write step applied under the store's lock
///
/// Returns `true` when the job was changed and must be written back.
pub type JobMutation = Box<dyn FnOnce(&mut Job) -> bool + Send>;

/// Box a closure as a [`JobMutation`]
pub fn mutation<F>(f: F) -> JobMutation
where
    F: FnOnce(&mut Job) -> bool + Send + 'static,
{
    Box::new(f)
}

/// Outcome of [`JobStore::update`]
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateResult {
    /// No job with that id exists
    Missing,
    /// The mutation declined to write; carries the current record
    Unchanged(Job),
    /// The mutation was applied; carries the new record
    Updated(Job),
}

impl UpdateResult {
    pub fn is_updated(&self) -> bool {
        matches!(self, UpdateResult::Updated(_))
    }

    pub fn into_updated(self) -> Option<Job> {
        match self {
            UpdateResult::Updated(job) => Some(job),
            _ => None,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Allocate the next id for `queue`, creating its id counter if needed
    async fn next_job_id(&self, queue: &str) -> StoreResult<JobId>;

    /// Insert or replace a job record
    async fn persist(&self, job: Job) -> StoreResult<()>;

    /// Atomically claim the best ready waiting job of `type_name`
    ///
    /// Order: highest priority, then earliest `ready_at`, then lowest id.
    /// The claimed job is returned already `active`, locked and charged one
    /// attempt.
    async fn claim_next_ready(
        &self,
        queue: &str,
        type_name: &str,
        lock_duration: Duration,
    ) -> StoreResult<Option<Job>>;

    async fn get(&self, queue: &str, id: JobId) -> StoreResult<Option<Job>>;

    /// Apply `mutation` to a job atomically
    async fn update(&self, queue: &str, id: JobId, mutation: JobMutation)
        -> StoreResult<UpdateResult>;

    /// Jobs in `state` ordered by id, at most `limit` when given
    async fn list_by_state(
        &self,
        queue: &str,
        state: JobState,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Job>>;

    /// Delete a job; returns the removed record if it existed
    async fn remove(&self, queue: &str, id: JobId) -> StoreResult<Option<Job>>;

    /// Delete every job in `state` whose age reference is at or before `cutoff`
    async fn remove_by_state_before(
        &self,
        queue: &str,
        state: JobState,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Job>>;

    /// Keep only the `keep` most recently finished jobs in `state`
    async fn trim_state(&self, queue: &str, state: JobState, keep: usize)
        -> StoreResult<Vec<Job>>;

    /// Delete every job of `queue`; metadata and the id counter survive
    async fn remove_all(&self, queue: &str) -> StoreResult<usize>;

    async fn counts(&self, queue: &str) -> StoreResult<QueueCounts>;

    async fn queue_meta(&self, queue: &str) -> StoreResult<Option<QueueMeta>>;

    async fn save_queue_meta(&self, meta: QueueMeta) -> StoreResult<()>;

    /// Names of every queue the store knows about, sorted
    async fn queue_names(&self) -> StoreResult<Vec<String>>;
}
