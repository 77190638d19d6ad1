//! Public API for the notification system
//!
//! External modules should import from here rather than directly from the
//! internal modules. There is no process-wide instance: each engine owns an
//! [`EventNotifier`] and hands clones to its components.

pub use crate::notifications::event::{
    Event, EventFilter, JobEvent, JobEventType, QueueEvent, QueueEventType, SystemEvent,
    SystemEventType,
};

pub use crate::notifications::error::NotificationError;
pub use crate::notifications::manager::{AsyncNotificationManager, EventReceiver};
pub use crate::notifications::notifier::{EventNotifier, LoggingSubscriber};

pub use crate::notifications::traits::{Subscriber, SubscriberError, SubscriberStatistics};
