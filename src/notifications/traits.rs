//! Traits for the notification system

use crate::notifications::event::Event;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// Boxed error returned by observers
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Delivery and processing counters for one subscriber
pub struct SubscriberStatistics {
    messages_delivered: AtomicUsize,
    messages_processed: AtomicUsize,
    error_count: AtomicUsize,
    tracks_processing: AtomicBool,
    last_message_time: RwLock<Option<Instant>>,
    last_error_time: RwLock<Option<Instant>>,
}

impl Default for SubscriberStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberStatistics {
    pub fn new() -> Self {
        Self {
            messages_delivered: AtomicUsize::new(0),
            messages_processed: AtomicUsize::new(0),
            error_count: AtomicUsize::new(0),
            tracks_processing: AtomicBool::new(false),
            last_message_time: RwLock::new(None),
            last_error_time: RwLock::new(None),
        }
    }

    pub fn messages_delivered(&self) -> usize {
        self.messages_delivered.load(Ordering::Relaxed)
    }

    pub fn record_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_processed(&self) -> usize {
        self.messages_processed.load(Ordering::Relaxed)
    }

    pub fn record_message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut time) = self.last_message_time.write() {
            *time = Some(Instant::now());
        }
    }

    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut time) = self.last_error_time.write() {
            *time = Some(Instant::now());
        }
    }

    /// Mark the subscription as drained by an attached observer that
    /// reports each processed event
    pub fn track_processing(&self) {
        self.tracks_processing.store(true, Ordering::Relaxed);
    }

    pub fn tracks_processing(&self) -> bool {
        self.tracks_processing.load(Ordering::Relaxed)
    }

    /// Events handed to the channel but not yet processed by an attached observer
    ///
    /// Always zero for raw receivers, which never report processing.
    pub fn pending(&self) -> usize {
        if !self.tracks_processing() {
            return 0;
        }
        self.messages_delivered()
            .saturating_sub(self.messages_processed())
    }

    pub fn last_message_time(&self) -> Option<Instant> {
        *self.last_message_time.read().ok()?
    }

    pub fn last_error_time(&self) -> Option<Instant> {
        *self.last_error_time.read().ok()?
    }
}

/// Observer of lifecycle events
///
/// Attached subscribers run on their own task; an error or panic from
/// `handle_event` is logged and counted, never propagated to the publisher.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Handle an incoming event
    async fn handle_event(&self, event: Event) -> Result<(), SubscriberError>;

    /// Unique identifier for this subscriber
    fn subscriber_id(&self) -> &str;

    /// Source identifier for debugging
    fn source(&self) -> &str;
}
