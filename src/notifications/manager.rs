//! AsyncNotificationManager implementation

use crate::notifications::error::NotificationError;
use crate::notifications::event::{Event, EventFilter};
use crate::notifications::traits::SubscriberStatistics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Pending-event count above which a subscriber is considered to be falling behind
const HIGH_WATER_MARK: usize = 10_000;

pub type EventReceiver = UnboundedReceiver<Event>;

struct SubscriberInfo {
    filter: EventFilter,
    source: String,
    sender: UnboundedSender<Event>,
    statistics: Arc<SubscriberStatistics>,
}

/// Registry of subscriber channels
///
/// Delivery is per-subscriber FIFO over unbounded channels, so publishing
/// never blocks on a slow observer.
#[derive(Default)]
pub struct AsyncNotificationManager {
    subscribers: HashMap<String, SubscriberInfo>,
}

impl AsyncNotificationManager {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
        }
    }

    pub fn subscribe(
        &mut self,
        subscriber_id: String,
        filter: EventFilter,
        source: String,
    ) -> EventReceiver {
        let (sender, receiver) = unbounded_channel();

        let subscriber_info = SubscriberInfo {
            filter,
            source: source.clone(),
            sender,
            statistics: Arc::new(SubscriberStatistics::new()),
        };

        if let Some(existing) = self.subscribers.insert(subscriber_id.clone(), subscriber_info) {
            log::warn!(
                "Subscriber '{}' replaced existing subscription (source: {} -> {})",
                subscriber_id,
                existing.source,
                source
            );
        }

        receiver
    }

    pub fn unsubscribe(&mut self, subscriber_id: &str) -> bool {
        self.subscribers.remove(subscriber_id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn has_subscriber(&self, subscriber_id: &str) -> bool {
        self.subscribers.contains_key(subscriber_id)
    }

    pub fn get_subscriber_statistics(
        &self,
        subscriber_id: &str,
    ) -> Option<Arc<SubscriberStatistics>> {
        self.subscribers
            .get(subscriber_id)
            .map(|info| info.statistics.clone())
    }

    pub fn check_high_water_marks(&self) -> Vec<String> {
        self.subscribers
            .iter()
            .filter(|(_, info)| info.statistics.pending() >= HIGH_WATER_MARK)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Deliver an event to every subscriber whose filter accepts it
    ///
    /// Subscribers whose receiver was dropped are removed and reported in
    /// the returned error; every live subscriber still gets the event.
    pub fn publish(&mut self, event: Event) -> Result<(), NotificationError> {
        let mut failed_subscribers = Vec::new();

        for (subscriber_id, subscriber_info) in &self.subscribers {
            if !subscriber_info.filter.accepts(&event) {
                continue;
            }
            if subscriber_info.sender.send(event.clone()).is_err() {
                failed_subscribers.push(subscriber_id.clone());
            } else {
                subscriber_info.statistics.record_delivered();
            }
        }

        for subscriber_id in &failed_subscribers {
            self.subscribers.remove(subscriber_id);
        }

        if !failed_subscribers.is_empty() {
            failed_subscribers.sort();
            return Err(NotificationError::PublishFailed {
                event_type: event.kind_name().to_string(),
                failed_subscribers,
            });
        }

        Ok(())
    }
}
