//! Periodic promotion of delayed jobs and recovery of stalled ones
//!
//! Every transition goes through a guarded [`JobStore::update`], so running
//! several dispatchers against one store (or a dispatcher racing a worker)
//! never applies a transition twice.

use crate::core::shutdown::ShutdownCoordinator;
use crate::core::time::TimeProvider;
use crate::notifications::api::{Event, EventNotifier, JobEvent, JobEventType};
use crate::queue::error::QueueResult;
use crate::queue::job::JobState;
use crate::queue::lifecycle::{self, STALLED_REASON};
use crate::queue::store::{mutation, JobStore, UpdateResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What one tick changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Delayed jobs moved to waiting
    pub promoted: usize,
    /// Expired locks returned to waiting
    pub stalled: usize,
    /// Expired locks whose job had no attempts left
    pub failed: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        *self == TickReport::default()
    }

    fn absorb(&mut self, other: TickReport) {
        self.promoted += other.promoted;
        self.stalled += other.stalled;
        self.failed += other.failed;
    }
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    notifier: EventNotifier,
    clock: Arc<dyn TimeProvider>,
    interval: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        notifier: EventNotifier,
        clock: Arc<dyn TimeProvider>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one pass over every known queue
    pub async fn tick(&self) -> QueueResult<TickReport> {
        let mut report = TickReport::default();
        for queue in self.store.queue_names().await? {
            report.absorb(self.tick_queue(&queue).await?);
        }
        if !report.is_empty() {
            log::debug!(
                "Dispatcher tick: {} promoted, {} stalled, {} failed",
                report.promoted,
                report.stalled,
                report.failed
            );
        }
        Ok(report)
    }

    async fn tick_queue(&self, queue: &str) -> QueueResult<TickReport> {
        let mut report = TickReport::default();
        let now = self.clock.now();

        for job in self.store.list_by_state(queue, JobState::Delayed, None).await? {
            if !job.is_ready(now) {
                continue;
            }
            let result = self
                .store
                .update(queue, job.id, mutation(move |job| lifecycle::promote(job, now)))
                .await?;
            if result.is_updated() {
                report.promoted += 1;
                self.notifier
                    .publish(Event::Job(JobEvent::new(JobEventType::Promoted, queue, job.id)));
            }
        }

        for job in self.store.list_by_state(queue, JobState::Active, None).await? {
            if !job.lock_expired(now) {
                continue;
            }
            let result = self
                .store
                .update(
                    queue,
                    job.id,
                    mutation(move |job| lifecycle::release_stalled(job, now, None)),
                )
                .await?;
            if let UpdateResult::Updated(released) = result {
                log::debug!("Job {} stalled in \"{}\" queue", released.id, queue);
                self.notifier
                    .publish(Event::Job(JobEvent::new(JobEventType::Stalled, queue, released.id)));
                if released.state == JobState::Failed {
                    report.failed += 1;
                    self.notifier.publish(Event::Job(JobEvent::with_message(
                        JobEventType::Failed,
                        queue,
                        released.id,
                        STALLED_REASON,
                    )));
                    lifecycle::apply_retention(self.store.as_ref(), &released).await?;
                } else {
                    report.stalled += 1;
                }
            }
        }

        Ok(report)
    }

    /// Tick on a fixed interval until shutdown is requested
    pub fn spawn(self: Arc<Self>, shutdown: ShutdownCoordinator) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            log::debug!("Dispatcher started with {:?} tick", self.interval);
            while !shutdown.is_shutdown_requested() {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            log::error!("Dispatcher tick failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            log::debug!("Dispatcher stopped");
        })
    }
}
