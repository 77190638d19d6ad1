//! Event types for the notification system

use crate::queue::job::JobId;
use std::time::SystemTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobEventType {
    Added,
    /// Delayed job became eligible after its delay elapsed
    Promoted,
    Active,
    Progress,
    Completed,
    /// Attempt failed and the job was scheduled for another one
    Retrying,
    Failed,
    Stalled,
    Removed,
    /// Administrative retry of a failed job
    Retried,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueEventType {
    Created,
    Paused,
    Resumed,
    Cleaned,
    Emptied,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemEventType {
    Startup,
    Shutdown,
    ForceShutdown,
    ShutdownTimeout,
}

/// Lifecycle transition of a single job
#[derive(Clone, Debug)]
pub struct JobEvent {
    pub event_type: JobEventType,
    pub timestamp: SystemTime,
    pub queue_name: String,
    pub job_id: JobId,
    /// Progress value for `Progress`, handler result for `Completed`
    pub data: Option<serde_json::Value>,
    /// Failure reason or other human-readable detail
    pub message: Option<String>,
}

impl JobEvent {
    pub fn new(event_type: JobEventType, queue_name: &str, job_id: JobId) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            queue_name: queue_name.to_string(),
            job_id,
            data: None,
            message: None,
        }
    }

    pub fn with_data(
        event_type: JobEventType,
        queue_name: &str,
        job_id: JobId,
        data: serde_json::Value,
    ) -> Self {
        Self {
            data: Some(data),
            ..Self::new(event_type, queue_name, job_id)
        }
    }

    pub fn with_message(
        event_type: JobEventType,
        queue_name: &str,
        job_id: JobId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(event_type, queue_name, job_id)
        }
    }
}

/// Queue-level transition
#[derive(Clone, Debug)]
pub struct QueueEvent {
    pub event_type: QueueEventType,
    pub timestamp: SystemTime,
    pub queue_name: String,
    /// Number of jobs affected (clean/empty)
    pub count: Option<usize>,
    pub message: Option<String>,
}

impl QueueEvent {
    pub fn new(event_type: QueueEventType, queue_name: &str) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            queue_name: queue_name.to_string(),
            count: None,
            message: None,
        }
    }

    pub fn with_count(event_type: QueueEventType, queue_name: &str, count: usize) -> Self {
        Self {
            count: Some(count),
            ..Self::new(event_type, queue_name)
        }
    }

    pub fn with_message(
        event_type: QueueEventType,
        queue_name: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(event_type, queue_name)
        }
    }
}

#[derive(Clone, Debug)]
pub struct SystemEvent {
    pub event_type: SystemEventType,
    pub timestamp: SystemTime,
    pub message: Option<String>,
}

impl SystemEvent {
    pub fn new(event_type: SystemEventType) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            message: None,
        }
    }

    pub fn with_message(event_type: SystemEventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: SystemTime::now(),
            message: Some(message.into()),
        }
    }
}

/// Unified event enum that encompasses all event types
#[derive(Clone, Debug)]
pub enum Event {
    Job(JobEvent),
    Queue(QueueEvent),
    System(SystemEvent),
}

impl Event {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::Job(_) => "Job",
            Event::Queue(_) => "Queue",
            Event::System(_) => "System",
        }
    }

    /// Queue this event belongs to, if any
    pub fn queue_name(&self) -> Option<&str> {
        match self {
            Event::Job(e) => Some(&e.queue_name),
            Event::Queue(e) => Some(&e.queue_name),
            Event::System(_) => None,
        }
    }
}

/// Event filtering options for subscribers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventFilter {
    JobOnly,
    QueueOnly,
    SystemOnly,
    QueueAndSystem,
    /// Job and queue events of one named queue
    QueueNamed(String),
    All,
}

impl EventFilter {
    /// Check if an event should be accepted by this filter
    pub fn accepts(&self, event: &Event) -> bool {
        match self {
            EventFilter::QueueNamed(name) => event.queue_name() == Some(name.as_str()),
            _ => matches!(
                (self, event),
                (EventFilter::JobOnly, Event::Job(_))
                    | (EventFilter::QueueOnly, Event::Queue(_))
                    | (EventFilter::SystemOnly, Event::System(_))
                    | (EventFilter::QueueAndSystem, Event::Queue(_))
                    | (EventFilter::QueueAndSystem, Event::System(_))
                    | (EventFilter::All, _)
            ),
        }
    }
}
