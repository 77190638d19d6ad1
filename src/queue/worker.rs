//! Worker pool
//!
//! One supervisor task per registered `(queue, type)` pair. Each supervisor
//! owns a semaphore sized to the registration's concurrency, claims a job
//! whenever a permit is free and runs the handler on its own task holding
//! that permit. Handler results are written back through a guarded update
//! that requires the claim's lock token, so a job that was removed or
//! reclaimed meanwhile is left untouched.

use crate::core::shutdown::ShutdownCoordinator;
use crate::core::time::{time_after, TimeProvider};
use crate::core::validation::{validate_name, ValidationError};
use crate::notifications::api::{Event, EventNotifier, JobEvent, JobEventType};
use crate::queue::error::{HandlerError, QueueError, QueueResult};
use crate::queue::job::{Job, JobId, JobState};
use crate::queue::lifecycle;
use crate::queue::registry::QueueRegistry;
use crate::queue::store::{mutation, JobStore, UpdateResult};
use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use uuid::Uuid;

pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Application code that processes one job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process the job; the returned value is stored as the job's result
    async fn handle(&self, ctx: JobContext) -> Result<Value, HandlerError>;
}

/// Adapter turning an async closure into a [`JobHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext) -> Result<Value, HandlerError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Timing knobs shared by every supervisor
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub lock_duration: Duration,
    pub poll_interval: Duration,
    pub backoff_ceiling: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            lock_duration: DEFAULT_LOCK_DURATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff_ceiling: crate::core::retry::DEFAULT_BACKOFF_CEILING,
        }
    }
}

/// Handle given to a handler for one claimed job
///
/// Progress and lock extension only land while this context's lock is
/// still the job's live lock.
#[derive(Clone)]
pub struct JobContext {
    job: Arc<Job>,
    token: Uuid,
    store: Arc<dyn JobStore>,
    notifier: EventNotifier,
    clock: Arc<dyn TimeProvider>,
    lock_duration: Duration,
}

impl JobContext {
    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn queue_name(&self) -> &str {
        &self.job.queue_name
    }

    pub fn type_name(&self) -> &str {
        &self.job.type_name
    }

    /// Attempt number of this run, starting at 1
    pub fn attempt(&self) -> u32 {
        self.job.attempts_made
    }

    /// The job as it was when claimed
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn payload(&self) -> &Value {
        &self.job.payload
    }

    /// Deserialize the payload into a typed structure
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        T::deserialize(&self.job.payload).map_err(HandlerError::from)
    }

    /// Record progress; returns `false` if the lock was lost
    pub async fn progress(&self, progress: impl Into<Value>) -> QueueResult<bool> {
        let progress = progress.into();
        let token = self.token;
        let recorded = progress.clone();
        let result = self
            .store
            .update(
                &self.job.queue_name,
                self.job.id,
                mutation(move |job| {
                    if !job.holds_lock(token) {
                        return false;
                    }
                    job.progress = recorded;
                    true
                }),
            )
            .await?;

        if result.is_updated() {
            self.notifier.publish(Event::Job(JobEvent::with_data(
                JobEventType::Progress,
                &self.job.queue_name,
                self.job.id,
                progress,
            )));
            Ok(true)
        } else {
            log::debug!(
                "Progress for job {} in \"{}\" queue dropped: lock no longer held",
                self.job.id,
                self.job.queue_name
            );
            Ok(false)
        }
    }

    /// Push the lock expiry forward by one lock duration
    pub async fn extend_lock(&self) -> QueueResult<bool> {
        let token = self.token;
        let expires_at = time_after(self.clock.now(), self.lock_duration);
        let result = self
            .store
            .update(
                &self.job.queue_name,
                self.job.id,
                mutation(move |job| {
                    if !job.holds_lock(token) {
                        return false;
                    }
                    job.lock_expires_at = Some(expires_at);
                    true
                }),
            )
            .await?;
        Ok(result.is_updated())
    }
}

/// Result of running one claimed job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Job),
    /// Attempt failed; the job is waiting for its next attempt
    Retrying(Job),
    Failed(Job),
    /// The job was removed while its handler ran
    Removed(JobId),
    /// The lock expired or was taken over before the result was written
    LockLost(JobId),
}

impl JobOutcome {
    pub fn job(&self) -> Option<&Job> {
        match self {
            JobOutcome::Completed(job) | JobOutcome::Retrying(job) | JobOutcome::Failed(job) => {
                Some(job)
            }
            JobOutcome::Removed(_) | JobOutcome::LockLost(_) => None,
        }
    }
}

/// Summary of a pool drain
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Every in-flight handler finished before the timeout
    pub drained: bool,
    /// Jobs whose handlers were aborted and whose locks were released
    pub aborted: Vec<(String, JobId)>,
}

struct Registration {
    queue: String,
    type_name: String,
    concurrency: usize,
    handler: Arc<dyn JobHandler>,
}

struct InFlight {
    token: Uuid,
    abort: AbortHandle,
}

struct PoolInner {
    store: Arc<dyn JobStore>,
    registry: Arc<QueueRegistry>,
    notifier: EventNotifier,
    clock: Arc<dyn TimeProvider>,
    settings: WorkerSettings,
    registrations: Mutex<Vec<Arc<Registration>>>,
    in_flight: Mutex<HashMap<(String, JobId), InFlight>>,
    idle: Notify,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
    running: Mutex<Option<ShutdownCoordinator>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Pool bookkeeping holds no invariants a panicking holder could break
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<QueueRegistry>,
        notifier: EventNotifier,
        clock: Arc<dyn TimeProvider>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                store,
                registry,
                notifier,
                clock,
                settings,
                registrations: Mutex::new(Vec::new()),
                in_flight: Mutex::new(HashMap::new()),
                idle: Notify::new(),
                supervisors: Mutex::new(Vec::new()),
                running: Mutex::new(None),
            }),
        }
    }

    /// Register the handler for `(queue, type_name)`
    ///
    /// If the pool is already running, the new supervisor starts at once.
    pub fn register(
        &self,
        queue: &str,
        type_name: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> QueueResult<()> {
        validate_name("queueName", queue)?;
        validate_name("typeName", type_name)?;
        if concurrency == 0 {
            return Err(ValidationError::new("concurrency must be greater than 0").into());
        }

        let registration = Arc::new(Registration {
            queue: queue.to_string(),
            type_name: type_name.to_string(),
            concurrency,
            handler,
        });
        {
            let mut registrations = locked(&self.inner.registrations);
            if registrations
                .iter()
                .any(|r| r.queue == queue && r.type_name == type_name)
            {
                return Err(ValidationError::new(format!(
                    "A handler for \"{}\" is already registered on \"{}\" queue",
                    type_name, queue
                ))
                .into());
            }
            registrations.push(registration.clone());
        }
        log::debug!(
            "Registered \"{}\" handler on \"{}\" queue with concurrency {}",
            type_name,
            queue,
            concurrency
        );

        let running = locked(&self.inner.running).clone();
        if let Some(shutdown) = running {
            self.spawn_supervisor(registration, shutdown);
        }
        Ok(())
    }

    pub fn registrations(&self) -> Vec<(String, String, usize)> {
        locked(&self.inner.registrations)
            .iter()
            .map(|r| (r.queue.clone(), r.type_name.clone(), r.concurrency))
            .collect()
    }

    /// Start one supervisor per registration; a second call is a no-op
    pub fn start(&self, shutdown: ShutdownCoordinator) {
        {
            let mut running = locked(&self.inner.running);
            if running.is_some() {
                return;
            }
            *running = Some(shutdown.clone());
        }
        let registrations = locked(&self.inner.registrations).clone();
        for registration in registrations {
            self.spawn_supervisor(registration, shutdown.clone());
        }
    }

    fn spawn_supervisor(&self, registration: Arc<Registration>, shutdown: ShutdownCoordinator) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(supervise(inner, registration, shutdown));
        locked(&self.inner.supervisors).push(handle);
    }

    pub fn in_flight_count(&self) -> usize {
        locked(&self.inner.in_flight).len()
    }

    /// Claim and run one job of `(queue, type_name)` on the current task
    ///
    /// Returns `None` when the queue is paused or nothing is ready.
    pub async fn process_next(&self, queue: &str, type_name: &str) -> QueueResult<Option<JobOutcome>> {
        let registration = locked(&self.inner.registrations)
            .iter()
            .find(|r| r.queue == queue && r.type_name == type_name)
            .cloned()
            .ok_or_else(|| QueueError::HandlerMissing {
                queue: queue.to_string(),
                type_name: type_name.to_string(),
            })?;

        match self.inner.claim(&registration).await? {
            Some(job) => Ok(Some(self.inner.execute(&registration, job).await)),
            None => Ok(None),
        }
    }

    /// Wait for supervisors to stop and in-flight handlers to finish
    ///
    /// Supervisors stop claiming once the shutdown coordinator fires. Handlers
    /// still running after `timeout` are aborted and their jobs released
    /// under the stall rule.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let deadline = tokio::time::Instant::now() + timeout;

        let supervisors: Vec<JoinHandle<()>> = std::mem::take(&mut *locked(&self.inner.supervisors));
        for handle in supervisors {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                log::warn!("Worker supervisor did not stop before the drain deadline");
            }
        }

        loop {
            if locked(&self.inner.in_flight).is_empty() {
                return DrainReport {
                    drained: true,
                    aborted: Vec::new(),
                };
            }
            if tokio::time::timeout_at(deadline, self.inner.idle.notified())
                .await
                .is_err()
            {
                break;
            }
        }

        let stranded: Vec<((String, JobId), InFlight)> =
            locked(&self.inner.in_flight).drain().collect();
        let mut aborted = Vec::with_capacity(stranded.len());
        for ((queue, job_id), in_flight) in stranded {
            in_flight.abort.abort();
            self.inner.release_aborted(&queue, job_id, in_flight.token).await;
            aborted.push((queue, job_id));
        }
        aborted.sort();
        log::warn!("Aborted {} in-flight jobs after drain timeout", aborted.len());

        DrainReport {
            drained: false,
            aborted,
        }
    }
}

async fn supervise(inner: Arc<PoolInner>, registration: Arc<Registration>, shutdown: ShutdownCoordinator) {
    let semaphore = Arc::new(Semaphore::new(registration.concurrency));
    let mut shutdown_rx = shutdown.subscribe();
    log::debug!(
        "Worker for \"{}\" on \"{}\" queue started",
        registration.type_name,
        registration.queue
    );

    while !shutdown.is_shutdown_requested() {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown_rx.recv() => break,
        };
        if shutdown.is_shutdown_requested() {
            break;
        }

        let idle = match inner.claim(&registration).await {
            Ok(Some(job)) => {
                inner.spawn_execution(registration.clone(), job, permit);
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::error!(
                    "Claim failed for \"{}\" on \"{}\" queue: {}",
                    registration.type_name,
                    registration.queue,
                    e
                );
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(inner.settings.poll_interval) => {}
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    log::debug!(
        "Worker for \"{}\" on \"{}\" queue stopped",
        registration.type_name,
        registration.queue
    );
}

impl PoolInner {
    async fn claim(&self, registration: &Registration) -> QueueResult<Option<Job>> {
        if self.registry.is_paused(&registration.queue).await? {
            return Ok(None);
        }
        Ok(self
            .store
            .claim_next_ready(
                &registration.queue,
                &registration.type_name,
                self.settings.lock_duration,
            )
            .await?)
    }

    fn spawn_execution(self: &Arc<Self>, registration: Arc<Registration>, job: Job, permit: OwnedSemaphorePermit) {
        let key = (job.queue_name.clone(), job.id);
        let Some(token) = job.lock_token else {
            log::error!("Claimed job {} has no lock token", job.id);
            return;
        };

        // Held across spawn so the task cannot deregister before it is registered
        let mut in_flight = locked(&self.in_flight);
        let inner = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            inner.execute(&registration, job).await;
            inner.finish(&task_key);
        });
        in_flight.insert(
            key,
            InFlight {
                token,
                abort: handle.abort_handle(),
            },
        );
    }

    fn finish(&self, key: &(String, JobId)) {
        let mut in_flight = locked(&self.in_flight);
        in_flight.remove(key);
        if in_flight.is_empty() {
            self.idle.notify_one();
        }
    }

    async fn execute(&self, registration: &Registration, job: Job) -> JobOutcome {
        let job_id = job.id;
        let queue = job.queue_name.clone();
        let Some(token) = job.lock_token else {
            return JobOutcome::LockLost(job_id);
        };

        log::info!(
            "Processing job {} ({}) in \"{}\" queue, attempt {}/{}",
            job_id,
            job.type_name,
            queue,
            job.attempts_made,
            job.options.max_attempts
        );
        self.notifier
            .publish(Event::Job(JobEvent::new(JobEventType::Active, &queue, job_id)));

        let ctx = JobContext {
            job: Arc::new(job),
            token,
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
            lock_duration: self.settings.lock_duration,
        };

        let result = match AssertUnwindSafe(registration.handler.handle(ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::new(panic_message(panic.as_ref()))
                .with_frame(format!("{} handler panicked", registration.type_name))),
        };

        match self.settle(&queue, job_id, token, result).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The lock stays in place; the dispatcher reclaims the job once it expires
                log::error!("Could not record result of job {} in \"{}\" queue: {}", job_id, queue, e);
                JobOutcome::LockLost(job_id)
            }
        }
    }

    async fn settle(
        &self,
        queue: &str,
        job_id: JobId,
        token: Uuid,
        result: Result<Value, HandlerError>,
    ) -> QueueResult<JobOutcome> {
        let now = self.clock.now();
        let ceiling = self.settings.backoff_ceiling;

        let update = match &result {
            Ok(value) => {
                let value = value.clone();
                mutation(move |job| lifecycle::complete(job, token, value, now))
            }
            Err(error) => {
                let error = error.clone();
                mutation(move |job| lifecycle::fail_attempt(job, token, &error, now, ceiling))
            }
        };

        let job = match self.store.update(queue, job_id, update).await? {
            UpdateResult::Updated(job) => job,
            UpdateResult::Missing => {
                log::info!("Job {} was removed from \"{}\" queue while running", job_id, queue);
                return Ok(JobOutcome::Removed(job_id));
            }
            UpdateResult::Unchanged(_) => {
                log::warn!(
                    "Job {} in \"{}\" queue lost its lock before finishing; result discarded",
                    job_id,
                    queue
                );
                return Ok(JobOutcome::LockLost(job_id));
            }
        };

        let outcome = match job.state {
            JobState::Completed => {
                log::debug!("Job {} completed in \"{}\" queue", job_id, queue);
                self.notifier.publish(Event::Job(JobEvent::with_data(
                    JobEventType::Completed,
                    queue,
                    job_id,
                    job.result.clone().unwrap_or(Value::Null),
                )));
                JobOutcome::Completed(job)
            }
            JobState::Failed => {
                let reason = job.failure_reason.clone().unwrap_or_default();
                log::debug!(
                    "Job {} failed in \"{}\" queue after {} attempts: {}",
                    job_id,
                    queue,
                    job.attempts_made,
                    reason
                );
                self.notifier.publish(Event::Job(JobEvent::with_message(
                    JobEventType::Failed,
                    queue,
                    job_id,
                    reason,
                )));
                JobOutcome::Failed(job)
            }
            _ => {
                let reason = job.failure_reason.clone().unwrap_or_default();
                log::debug!(
                    "Job {} in \"{}\" queue failed attempt {}/{}: {}",
                    job_id,
                    queue,
                    job.attempts_made,
                    job.options.max_attempts,
                    reason
                );
                self.notifier.publish(Event::Job(JobEvent::with_message(
                    JobEventType::Retrying,
                    queue,
                    job_id,
                    reason,
                )));
                JobOutcome::Retrying(job)
            }
        };

        if let Some(finished) = outcome.job() {
            lifecycle::apply_retention(self.store.as_ref(), finished).await?;
        }
        Ok(outcome)
    }

    async fn release_aborted(&self, queue: &str, job_id: JobId, token: Uuid) {
        let now = self.clock.now();
        let result = self
            .store
            .update(
                queue,
                job_id,
                mutation(move |job| lifecycle::release_stalled(job, now, Some(token))),
            )
            .await;
        match result {
            Ok(UpdateResult::Updated(job)) => {
                self.notifier
                    .publish(Event::Job(JobEvent::new(JobEventType::Stalled, queue, job_id)));
                if job.state == JobState::Failed {
                    self.notifier.publish(Event::Job(JobEvent::with_message(
                        JobEventType::Failed,
                        queue,
                        job_id,
                        lifecycle::STALLED_REASON,
                    )));
                }
            }
            Ok(_) => {}
            Err(e) => log::error!(
                "Could not release lock of aborted job {} in \"{}\" queue: {}",
                job_id,
                queue,
                e
            ),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
