//! In-memory job store with JSON snapshot durability
//!
//! All queues live behind a single `std::sync::Mutex`. Each store primitive
//! runs start to finish under that lock and never awaits while holding it,
//! which is what makes claims exclusive and batch removals all-or-nothing.
//! Per-state id sets keep counts O(1).

use crate::core::sync::handle_mutex_poison;
use crate::core::time::{system_clock, time_after, TimeProvider};
use crate::core::version::store_format_version;
use crate::queue::error::{StoreError, StoreResult};
use crate::queue::job::{Job, JobId, JobState, QueueCounts, QueueMeta};
use crate::queue::store::{JobMutation, JobStore, UpdateResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct QueueData {
    next_id: JobId,
    meta: Option<QueueMeta>,
    jobs: BTreeMap<JobId, Job>,
    by_state: BTreeMap<JobState, BTreeSet<JobId>>,
}

impl QueueData {
    fn insert(&mut self, job: Job) {
        if let Some(previous) = self.jobs.get(&job.id) {
            let old_state = previous.state;
            self.unindex(old_state, job.id);
        }
        self.by_state.entry(job.state).or_default().insert(job.id);
        self.next_id = self.next_id.max(job.id);
        self.jobs.insert(job.id, job);
    }

    fn take(&mut self, id: JobId) -> Option<Job> {
        let job = self.jobs.remove(&id)?;
        self.unindex(job.state, id);
        Some(job)
    }

    fn unindex(&mut self, state: JobState, id: JobId) {
        if let Some(ids) = self.by_state.get_mut(&state) {
            ids.remove(&id);
        }
    }

    fn ids_in(&self, state: JobState) -> impl Iterator<Item = JobId> + '_ {
        self.by_state.get(&state).into_iter().flatten().copied()
    }

    fn count(&self, state: JobState) -> usize {
        self.by_state.get(&state).map_or(0, BTreeSet::len)
    }

    fn take_matching(&mut self, state: JobState, keep: impl Fn(&Job) -> bool) -> Vec<Job> {
        let doomed: Vec<JobId> = self
            .ids_in(state)
            .filter(|id| self.jobs.get(id).is_some_and(|job| !keep(job)))
            .collect();
        doomed.into_iter().filter_map(|id| self.take(id)).collect()
    }
}

/// Serialized form of the whole store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    pub queues: Vec<QueueSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub name: String,
    pub next_id: JobId,
    pub meta: Option<QueueMeta>,
    pub jobs: Vec<Job>,
}

pub struct MemoryJobStore {
    queues: Mutex<BTreeMap<String, QueueData>>,
    clock: Arc<dyn TimeProvider>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Open a store backed by `path`, starting empty when the file is absent
    pub async fn open(path: &Path, clock: Arc<dyn TimeProvider>) -> StoreResult<Self> {
        let store = Self::with_clock(clock);
        if tokio::fs::try_exists(path).await? {
            store.load_snapshot(path).await?;
        } else {
            log::debug!("No snapshot at {}; starting with an empty store", path.display());
        }
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, BTreeMap<String, QueueData>>> {
        handle_mutex_poison(self.queues.lock(), StoreError::Inconsistent)
    }

    /// Copy the complete store state
    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let queues = self.lock()?;
        Ok(StoreSnapshot {
            format_version: store_format_version(),
            saved_at: self.clock.now(),
            queues: queues
                .iter()
                .map(|(name, data)| QueueSnapshot {
                    name: name.clone(),
                    next_id: data.next_id,
                    meta: data.meta.clone(),
                    jobs: data.jobs.values().cloned().collect(),
                })
                .collect(),
        })
    }

    /// Replace the complete store state
    pub fn restore(&self, snapshot: StoreSnapshot) -> StoreResult<()> {
        let expected = store_format_version();
        if snapshot.format_version != expected {
            return Err(StoreError::FormatMismatch {
                expected,
                found: snapshot.format_version,
            });
        }

        let mut rebuilt = BTreeMap::new();
        for queue in snapshot.queues {
            let mut data = QueueData {
                next_id: queue.next_id,
                meta: queue.meta,
                ..QueueData::default()
            };
            for job in queue.jobs {
                if job.queue_name != queue.name {
                    return Err(StoreError::Inconsistent(format!(
                        "job {} recorded under queue \"{}\" but belongs to \"{}\"",
                        job.id, queue.name, job.queue_name
                    )));
                }
                data.insert(job);
            }
            rebuilt.insert(queue.name, data);
        }

        *self.lock()? = rebuilt;
        Ok(())
    }

    /// Write the store to `path` through a temporary sibling file
    pub async fn save_snapshot(&self, path: &Path) -> StoreResult<()> {
        let snapshot = self.snapshot()?;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = std::path::PathBuf::from(tmp_name);

        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        log::trace!(
            "Saved snapshot of {} queues to {}",
            snapshot.queues.len(),
            path.display()
        );
        Ok(())
    }

    pub async fn load_snapshot(&self, path: &Path) -> StoreResult<()> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
        let queue_count = snapshot.queues.len();
        self.restore(snapshot)?;
        log::debug!("Loaded {} queues from {}", queue_count, path.display());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn next_job_id(&self, queue: &str) -> StoreResult<JobId> {
        let mut queues = self.lock()?;
        let data = queues.entry(queue.to_string()).or_default();
        data.next_id += 1;
        Ok(data.next_id)
    }

    async fn persist(&self, job: Job) -> StoreResult<()> {
        let mut queues = self.lock()?;
        queues.entry(job.queue_name.clone()).or_default().insert(job);
        Ok(())
    }

    async fn claim_next_ready(
        &self,
        queue: &str,
        type_name: &str,
        lock_duration: Duration,
    ) -> StoreResult<Option<Job>> {
        let now = self.clock.now();
        let mut queues = self.lock()?;
        let Some(data) = queues.get_mut(queue) else {
            return Ok(None);
        };

        let candidate = data
            .ids_in(JobState::Waiting)
            .filter_map(|id| data.jobs.get(&id))
            .filter(|job| {
                job.type_name == type_name && job.is_ready(now) && job.has_attempts_remaining()
            })
            .max_by_key(|job| (job.options.priority, Reverse(job.ready_at), Reverse(job.id)))
            .map(|job| job.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let Some(mut job) = data.take(id) else {
            return Ok(None);
        };

        job.state = JobState::Active;
        job.attempts_made += 1;
        job.processed_on = Some(now);
        job.lock_token = Some(Uuid::new_v4());
        job.lock_expires_at = Some(time_after(now, lock_duration));
        data.insert(job.clone());

        Ok(Some(job))
    }

    async fn get(&self, queue: &str, id: JobId) -> StoreResult<Option<Job>> {
        let queues = self.lock()?;
        Ok(queues.get(queue).and_then(|data| data.jobs.get(&id)).cloned())
    }

    async fn update(
        &self,
        queue: &str,
        id: JobId,
        mutation: JobMutation,
    ) -> StoreResult<UpdateResult> {
        let mut queues = self.lock()?;
        let Some(data) = queues.get_mut(queue) else {
            return Ok(UpdateResult::Missing);
        };
        let Some(current) = data.jobs.get(&id) else {
            return Ok(UpdateResult::Missing);
        };

        let mut candidate = current.clone();
        if !mutation(&mut candidate) {
            return Ok(UpdateResult::Unchanged(candidate));
        }
        if candidate.id != id || candidate.queue_name != queue {
            return Err(StoreError::Inconsistent(format!(
                "update of job {} in \"{}\" changed its identity",
                id, queue
            )));
        }

        data.insert(candidate.clone());
        Ok(UpdateResult::Updated(candidate))
    }

    async fn list_by_state(
        &self,
        queue: &str,
        state: JobState,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Job>> {
        let queues = self.lock()?;
        let Some(data) = queues.get(queue) else {
            return Ok(Vec::new());
        };
        Ok(data
            .ids_in(state)
            .filter_map(|id| data.jobs.get(&id))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn remove(&self, queue: &str, id: JobId) -> StoreResult<Option<Job>> {
        let mut queues = self.lock()?;
        Ok(queues.get_mut(queue).and_then(|data| data.take(id)))
    }

    async fn remove_by_state_before(
        &self,
        queue: &str,
        state: JobState,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Job>> {
        let mut queues = self.lock()?;
        let Some(data) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };
        Ok(data.take_matching(state, |job| job.age_reference() > cutoff))
    }

    async fn trim_state(
        &self,
        queue: &str,
        state: JobState,
        keep: usize,
    ) -> StoreResult<Vec<Job>> {
        let mut queues = self.lock()?;
        let Some(data) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };
        if data.count(state) <= keep {
            return Ok(Vec::new());
        }

        // Newest first by finish time, ties by id
        let mut ranked: Vec<(DateTime<Utc>, JobId)> = data
            .ids_in(state)
            .filter_map(|id| data.jobs.get(&id))
            .map(|job| (job.age_reference(), job.id))
            .collect();
        ranked.sort_unstable_by(|a, b| b.cmp(a));

        let doomed: Vec<JobId> = ranked.into_iter().skip(keep).map(|(_, id)| id).collect();
        Ok(doomed.into_iter().filter_map(|id| data.take(id)).collect())
    }

    async fn remove_all(&self, queue: &str) -> StoreResult<usize> {
        let mut queues = self.lock()?;
        let Some(data) = queues.get_mut(queue) else {
            return Ok(0);
        };
        let removed = data.jobs.len();
        data.jobs.clear();
        data.by_state.clear();
        Ok(removed)
    }

    async fn counts(&self, queue: &str) -> StoreResult<QueueCounts> {
        let queues = self.lock()?;
        let mut counts = QueueCounts::default();
        if let Some(data) = queues.get(queue) {
            for (state, ids) in &data.by_state {
                counts.set(*state, ids.len());
            }
        }
        Ok(counts)
    }

    async fn queue_meta(&self, queue: &str) -> StoreResult<Option<QueueMeta>> {
        let queues = self.lock()?;
        Ok(queues.get(queue).and_then(|data| data.meta.clone()))
    }

    async fn save_queue_meta(&self, meta: QueueMeta) -> StoreResult<()> {
        let mut queues = self.lock()?;
        let name = meta.name.clone();
        queues.entry(name).or_default().meta = Some(meta);
        Ok(())
    }

    async fn queue_names(&self) -> StoreResult<Vec<String>> {
        let queues = self.lock()?;
        Ok(queues.keys().cloned().collect())
    }
}
