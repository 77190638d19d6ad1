//! Shared publish handle and attached observers
//!
//! [`EventNotifier`] is the cloneable handle the engine components publish
//! through. Publishing is synchronous and infallible from the caller's view:
//! a dropped receiver is logged and pruned, never reported upwards, so a
//! broken observer cannot affect job processing.

use crate::notifications::event::{Event, EventFilter, JobEventType, QueueEventType};
use crate::notifications::manager::{AsyncNotificationManager, EventReceiver};
use crate::notifications::traits::{Subscriber, SubscriberError, SubscriberStatistics};
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

#[derive(Clone, Default)]
pub struct EventNotifier {
    inner: Arc<Mutex<AsyncNotificationManager>>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn manager(&self) -> MutexGuard<'_, AsyncNotificationManager> {
        // Subscriber bookkeeping stays usable even if a holder panicked
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a raw receiver for events accepted by `filter`
    pub fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        filter: EventFilter,
        source: impl Into<String>,
    ) -> EventReceiver {
        self.manager()
            .subscribe(subscriber_id.into(), filter, source.into())
    }

    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        self.manager().unsubscribe(subscriber_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.manager().subscriber_count()
    }

    pub fn statistics(&self, subscriber_id: &str) -> Option<Arc<SubscriberStatistics>> {
        self.manager().get_subscriber_statistics(subscriber_id)
    }

    /// Deliver an event to all matching subscribers
    pub fn publish(&self, event: Event) {
        let mut manager = self.manager();
        if let Err(e) = manager.publish(event) {
            log::debug!("{}", e);
        }
        let lagging = manager.check_high_water_marks();
        if !lagging.is_empty() {
            log::warn!("Subscribers falling behind on events: {:?}", lagging);
        }
    }

    /// Run `subscriber` on its own task, fed by a fresh subscription
    ///
    /// The task ends when the subscription is removed (see
    /// [`Self::unsubscribe`] and [`Self::detach_all`]).
    pub fn attach(&self, subscriber: Arc<dyn Subscriber>, filter: EventFilter) -> JoinHandle<()> {
        let subscriber_id = subscriber.subscriber_id().to_string();
        let mut receiver = self.subscribe(subscriber_id.clone(), filter, subscriber.source());
        let statistics = self.statistics(&subscriber_id).unwrap_or_default();
        statistics.track_processing();

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let kind = event.kind_name();
                let outcome = AssertUnwindSafe(subscriber.handle_event(event))
                    .catch_unwind()
                    .await;
                statistics.record_message_processed();
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        statistics.record_error();
                        log::warn!(
                            "Subscriber '{}' failed to handle {} event: {}",
                            subscriber_id,
                            kind,
                            e
                        );
                    }
                    Err(_) => {
                        statistics.record_error();
                        log::error!(
                            "Subscriber '{}' panicked while handling {} event",
                            subscriber_id,
                            kind
                        );
                    }
                }
            }
            log::trace!("Subscriber '{}' detached", subscriber_id);
        })
    }

    /// Drop every subscription; attached tasks finish once their backlog drains
    pub fn detach_all(&self) {
        let mut manager = self.manager();
        *manager = AsyncNotificationManager::new();
    }
}

/// Observer that writes lifecycle events to the log
pub struct LoggingSubscriber {
    id: String,
}

impl LoggingSubscriber {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Subscriber for LoggingSubscriber {
    async fn handle_event(&self, event: Event) -> Result<(), SubscriberError> {
        match event {
            Event::Job(e) => {
                let detail = e.message.as_deref().unwrap_or("");
                match e.event_type {
                    JobEventType::Completed => {
                        log::info!("Job {} completed in \"{}\" queue", e.job_id, e.queue_name)
                    }
                    JobEventType::Failed => log::warn!(
                        "Job {} failed in \"{}\" queue: {}",
                        e.job_id,
                        e.queue_name,
                        detail
                    ),
                    JobEventType::Retrying => log::info!(
                        "Job {} in \"{}\" queue will be retried: {}",
                        e.job_id,
                        e.queue_name,
                        detail
                    ),
                    JobEventType::Stalled => {
                        log::warn!("Job {} stalled in \"{}\" queue", e.job_id, e.queue_name)
                    }
                    JobEventType::Progress => log::debug!(
                        "Job {} progress in \"{}\" queue: {}",
                        e.job_id,
                        e.queue_name,
                        e.data.unwrap_or(serde_json::Value::Null)
                    ),
                    other => log::debug!(
                        "Job {} in \"{}\" queue: {:?}",
                        e.job_id,
                        e.queue_name,
                        other
                    ),
                }
            }
            Event::Queue(e) => match e.event_type {
                QueueEventType::Cleaned | QueueEventType::Emptied => log::info!(
                    "Queue \"{}\" {:?}: {} jobs removed",
                    e.queue_name,
                    e.event_type,
                    e.count.unwrap_or(0)
                ),
                other => log::info!("Queue \"{}\" {:?}", e.queue_name, other),
            },
            Event::System(e) => match e.message {
                Some(message) => log::info!("System {:?}: {}", e.event_type, message),
                None => log::info!("System {:?}", e.event_type),
            },
        }
        Ok(())
    }

    fn subscriber_id(&self) -> &str {
        &self.id
    }

    fn source(&self) -> &str {
        "notifier:logging"
    }
}
