//! QueueManager - public facade of the job queue engine
//!
//! The QueueManager owns one instance of every engine component and is the
//! only type application code needs:
//! - producers call [`QueueManager::enqueue`] / [`QueueManager::enqueue_payload`]
//! - application code registers handlers and calls [`QueueManager::start`]
//! - operators use the status and administrative calls
//!
//! There is no global instance; create one manager per engine and share it
//! behind an `Arc`.
//!
//! # Example
//!
//! ```rust,no_run
//! use jobqueue::queue::api::{handler_fn, EngineConfig, QueueManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = QueueManager::new(EngineConfig::default());
//! manager.register_handler(
//!     "email",
//!     "send-email",
//!     5,
//!     handler_fn(|ctx| async move {
//!         ctx.progress(100).await.ok();
//!         Ok(serde_json::json!({ "sent": true }))
//!     }),
//! )?;
//! manager.start();
//!
//! let job = manager
//!     .enqueue("email", "send-email", serde_json::json!({
//!         "to": "ops@example.com", "subject": "Hi", "body": "Hello"
//!     }), None)
//!     .await?;
//! println!("queued job {}", job.id);
//!
//! manager.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::core::retry::DEFAULT_BACKOFF_CEILING;
use crate::core::shutdown::ShutdownCoordinator;
use crate::core::time::{system_clock, time_before, TimeProvider};
use crate::core::validation::{validate_name, ValidationError};
use crate::notifications::api::{
    Event, EventFilter, EventNotifier, EventReceiver, JobEvent, JobEventType, QueueEvent,
    QueueEventType, Subscriber, SystemEvent, SystemEventType,
};
use crate::queue::dispatcher::{Dispatcher, TickReport, DEFAULT_TICK_INTERVAL};
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::job::{Job, JobId, JobOptions, JobOptionsOverride, JobState, JobStatus, QueueStatus};
use crate::queue::lifecycle;
use crate::queue::memory::MemoryJobStore;
use crate::queue::payload::{validate_payload, JobPayload};
use crate::queue::registry::QueueRegistry;
use crate::queue::store::{mutation, JobStore, UpdateResult};
use crate::queue::worker::{
    DrainReport, JobHandler, JobOutcome, WorkerPool, WorkerSettings, DEFAULT_LOCK_DURATION,
    DEFAULT_POLL_INTERVAL,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine-wide settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub lock_duration: Duration,
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
    pub backoff_ceiling: Duration,
    /// Lowest-precedence job options
    pub default_options: JobOptions,
    /// Default options applied to queues when they are first created
    pub queue_defaults: HashMap<String, JobOptionsOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            lock_duration: DEFAULT_LOCK_DURATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            backoff_ceiling: DEFAULT_BACKOFF_CEILING,
            default_options: JobOptions::default(),
            queue_defaults: HashMap::new(),
        }
    }
}

pub struct QueueManager {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    registry: Arc<QueueRegistry>,
    notifier: EventNotifier,
    pool: WorkerPool,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn TimeProvider>,
    shutdown: ShutdownCoordinator,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl QueueManager {
    /// Engine over a fresh in-memory store and the system clock
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryJobStore::new()), system_clock())
    }

    pub fn with_store(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        let notifier = EventNotifier::new();
        let registry = Arc::new(QueueRegistry::new(
            store.clone(),
            notifier.clone(),
            config.queue_defaults.clone(),
        ));
        let pool = WorkerPool::new(
            store.clone(),
            registry.clone(),
            notifier.clone(),
            clock.clone(),
            WorkerSettings {
                lock_duration: config.lock_duration,
                poll_interval: config.poll_interval,
                backoff_ceiling: config.backoff_ceiling,
            },
        );
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            config.tick_interval,
        ));

        Self {
            config,
            store,
            registry,
            notifier,
            pool,
            dispatcher,
            clock,
            shutdown: ShutdownCoordinator::new(),
            dispatcher_task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    /// The coordinator `start()` listens on; install signal handlers on it
    pub fn shutdown_coordinator(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Add a job; see module docs for option precedence
    pub async fn enqueue(
        &self,
        queue: &str,
        type_name: &str,
        payload: Value,
        options: Option<JobOptionsOverride>,
    ) -> QueueResult<Job> {
        validate_name("queueName", queue)?;
        validate_name("typeName", type_name)?;
        validate_payload(type_name, &payload)?;
        if options.as_ref().and_then(|o| o.max_attempts) == Some(0) {
            return Err(ValidationError::new("maxAttempts must be at least 1").into());
        }

        let meta = self.registry.ensure(queue).await?;
        let resolved = options
            .unwrap_or_default()
            .layered_over(&meta.default_options)
            .merge_over(&self.config.default_options);
        if resolved.max_attempts == 0 {
            return Err(ValidationError::new("maxAttempts must be at least 1").into());
        }

        let id = self.store.next_job_id(queue).await?;
        let job = Job::new(id, queue, type_name, payload, resolved, self.clock.now());
        self.store.persist(job.clone()).await?;

        log::debug!(
            "Job {} ({}) added to \"{}\" queue as {}",
            job.id,
            type_name,
            queue,
            job.state
        );
        self.notifier
            .publish(Event::Job(JobEvent::new(JobEventType::Added, queue, job.id)));
        Ok(job)
    }

    /// Add a job of one of the built-in types to its own queue
    pub async fn enqueue_payload(
        &self,
        payload: JobPayload,
        options: Option<JobOptionsOverride>,
    ) -> QueueResult<Job> {
        payload.validate()?;
        let value = payload.to_value()?;
        self.enqueue(payload.queue_name(), payload.type_name(), value, options)
            .await
    }

    pub async fn get_job_status(&self, queue: &str, id: JobId) -> QueueResult<Option<JobStatus>> {
        Ok(self.store.get(queue, id).await?.map(|job| job.status()))
    }

    pub async fn get_queue_status(&self, queue: &str) -> QueueResult<QueueStatus> {
        let meta = self.registry.ensure(queue).await?;
        let counts = self.store.counts(queue).await?;
        Ok(QueueStatus {
            name: meta.name,
            counts,
            paused: meta.paused,
            error: None,
        })
    }

    /// Status of every known queue; a queue that fails to load gets a
    /// zeroed entry carrying the error
    pub async fn get_all_queues_status(&self) -> QueueResult<Vec<QueueStatus>> {
        let mut statuses = Vec::new();
        for name in self.registry.names().await? {
            match self.get_queue_status(&name).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    log::warn!("Could not read status of \"{}\" queue: {}", name, e);
                    statuses.push(QueueStatus::unavailable(&name, e.to_string()));
                }
            }
        }
        Ok(statuses)
    }

    /// Stop workers claiming from `queue`; returns `true` if it was running
    pub async fn pause_queue(&self, queue: &str) -> QueueResult<bool> {
        let changed = self.registry.set_paused(queue, true).await?;
        if changed {
            log::info!("Queue \"{}\" paused", queue);
        }
        Ok(changed)
    }

    pub async fn resume_queue(&self, queue: &str) -> QueueResult<bool> {
        let changed = self.registry.set_paused(queue, false).await?;
        if changed {
            log::info!("Queue \"{}\" resumed", queue);
        }
        Ok(changed)
    }

    pub async fn set_queue_defaults(
        &self,
        queue: &str,
        defaults: JobOptionsOverride,
    ) -> QueueResult<()> {
        self.registry.set_default_options(queue, defaults).await
    }

    /// Remove jobs in `state` older than `grace`
    pub async fn clean_queue(
        &self,
        queue: &str,
        grace: Duration,
        state: JobState,
    ) -> QueueResult<Vec<Job>> {
        validate_name("queueName", queue)?;
        let cutoff = time_before(self.clock.now(), grace);
        let removed = self
            .store
            .remove_by_state_before(queue, state, cutoff)
            .await?;

        log::info!(
            "Cleaned {} {} jobs from \"{}\" queue",
            removed.len(),
            state,
            queue
        );
        self.notifier.publish(Event::Queue(QueueEvent::with_count(
            QueueEventType::Cleaned,
            queue,
            removed.len(),
        )));
        Ok(removed)
    }

    /// Delete every job in `queue`
    pub async fn empty_queue(&self, queue: &str) -> QueueResult<usize> {
        validate_name("queueName", queue)?;
        let removed = self.store.remove_all(queue).await?;
        log::info!("Emptied \"{}\" queue: {} jobs removed", queue, removed);
        self.notifier.publish(Event::Queue(QueueEvent::with_count(
            QueueEventType::Emptied,
            queue,
            removed,
        )));
        Ok(removed)
    }

    /// Send a failed job back to waiting with a fresh attempt budget
    pub async fn retry_job(&self, queue: &str, id: JobId) -> QueueResult<Job> {
        let now = self.clock.now();
        match self
            .store
            .update(queue, id, mutation(move |job| lifecycle::reset_for_retry(job, now)))
            .await?
        {
            UpdateResult::Updated(job) => {
                log::info!("Job {} in \"{}\" queue queued for retry", id, queue);
                self.notifier
                    .publish(Event::Job(JobEvent::new(JobEventType::Retried, queue, id)));
                Ok(job)
            }
            UpdateResult::Unchanged(job) => Err(QueueError::InvalidState {
                job_id: id,
                state: job.state,
                expected: JobState::Failed,
            }),
            UpdateResult::Missing => Err(QueueError::not_found(queue, id)),
        }
    }

    /// Delete a job in any state; returns `false` if it did not exist
    pub async fn remove_job(&self, queue: &str, id: JobId) -> QueueResult<bool> {
        match self.store.remove(queue, id).await? {
            Some(job) => {
                log::info!("Job {} removed from \"{}\" queue ({})", id, queue, job.state);
                self.notifier
                    .publish(Event::Job(JobEvent::new(JobEventType::Removed, queue, id)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn register_handler(
        &self,
        queue: &str,
        type_name: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> QueueResult<()> {
        self.pool.register(queue, type_name, concurrency, handler)
    }

    /// Registered `(queue, type, concurrency)` triples
    pub fn registrations(&self) -> Vec<(String, String, usize)> {
        self.pool.registrations()
    }

    /// Run one job of `(queue, type_name)` inline
    pub async fn process_next(
        &self,
        queue: &str,
        type_name: &str,
    ) -> QueueResult<Option<JobOutcome>> {
        self.pool.process_next(queue, type_name).await
    }

    /// Run one dispatcher pass inline
    pub async fn tick(&self) -> QueueResult<TickReport> {
        self.dispatcher.tick().await
    }

    /// Start the dispatcher and every registered worker; idempotent
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = self.dispatcher.clone().spawn(self.shutdown.clone());
        *self
            .dispatcher_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        self.pool.start(self.shutdown.clone());

        log::info!(
            "Job queue engine started with {} handlers",
            self.pool.registrations().len()
        );
        self.notifier
            .publish(Event::System(SystemEvent::new(SystemEventType::Startup)));
    }

    /// Stop claiming, drain in-flight jobs and close every queue
    pub async fn shutdown(&self) -> QueueResult<DrainReport> {
        self.notifier.publish(Event::System(SystemEvent::new(
            SystemEventType::Shutdown,
        )));
        self.shutdown.trigger_shutdown();

        let dispatcher_task = self
            .dispatcher_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = dispatcher_task {
            if let Err(e) = handle.await {
                log::warn!("Dispatcher task ended abnormally: {}", e);
            }
        }

        let report = self.pool.drain(self.config.drain_timeout).await;
        if !report.drained {
            self.notifier.publish(Event::System(SystemEvent::with_message(
                SystemEventType::ShutdownTimeout,
                format!("{} jobs aborted", report.aborted.len()),
            )));
        }

        self.close_all().await?;
        log::info!("Job queue engine stopped");
        Ok(report)
    }

    pub fn subscribe(&self, subscriber_id: &str, filter: EventFilter) -> EventReceiver {
        self.notifier.subscribe(subscriber_id, filter, "queue:manager")
    }

    pub fn attach(&self, subscriber: Arc<dyn Subscriber>, filter: EventFilter) -> JoinHandle<()> {
        self.notifier.attach(subscriber, filter)
    }

    pub async fn queue_names(&self) -> QueueResult<Vec<String>> {
        self.registry.names().await
    }

    pub async fn close_all(&self) -> QueueResult<Vec<String>> {
        self.registry.close_all().await
    }
}
