//! Job records, options and status snapshots

use crate::core::retry::BackoffPolicy;
use crate::core::time::time_after;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Job identifier, unique and monotonically assigned within one queue
pub type JobId = u64;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_KEEP_COMPLETED: usize = 100;
pub const DEFAULT_KEEP_FAILED: usize = 500;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Delayed,
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// How many finished jobs to keep once a job reaches a terminal state
///
/// Serialized the way queue options are usually written: `false` keeps
/// everything, `true` removes immediately, a number keeps the latest N.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RetentionRepr", into = "RetentionRepr")]
pub enum Retention {
    KeepAll,
    RemoveImmediately,
    KeepLatest(usize),
}

impl Retention {
    /// Number of jobs to keep, `None` for unbounded
    pub fn keep_count(self) -> Option<usize> {
        match self {
            Retention::KeepAll => None,
            Retention::RemoveImmediately => Some(0),
            Retention::KeepLatest(n) => Some(n),
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum RetentionRepr {
    Flag(bool),
    Count(usize),
}

impl From<RetentionRepr> for Retention {
    fn from(repr: RetentionRepr) -> Self {
        match repr {
            RetentionRepr::Flag(false) => Retention::KeepAll,
            RetentionRepr::Flag(true) => Retention::RemoveImmediately,
            RetentionRepr::Count(n) => Retention::KeepLatest(n),
        }
    }
}

impl From<Retention> for RetentionRepr {
    fn from(retention: Retention) -> Self {
        match retention {
            Retention::KeepAll => RetentionRepr::Flag(false),
            Retention::RemoveImmediately => RetentionRepr::Flag(true),
            Retention::KeepLatest(n) => RetentionRepr::Count(n),
        }
    }
}

/// Fully resolved per-job options
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub initial_delay_ms: u64,
    /// Larger runs first
    pub priority: i32,
    pub remove_on_complete: Retention,
    pub remove_on_fail: Retention,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            initial_delay_ms: 0,
            priority: 0,
            remove_on_complete: Retention::KeepLatest(DEFAULT_KEEP_COMPLETED),
            remove_on_fail: Retention::KeepLatest(DEFAULT_KEEP_FAILED),
        }
    }
}

/// Partial options supplied by a caller or configured as queue defaults
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptionsOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_on_complete: Option<Retention>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_on_fail: Option<Retention>,
}

impl JobOptionsOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = Some(policy);
        self
    }

    pub fn delay_ms(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = Some(delay_ms);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn remove_on_complete(mut self, retention: Retention) -> Self {
        self.remove_on_complete = Some(retention);
        self
    }

    pub fn remove_on_fail(mut self, retention: Retention) -> Self {
        self.remove_on_fail = Some(retention);
        self
    }

    /// Combine with a lower-precedence override; fields set here win
    pub fn layered_over(&self, lower: &JobOptionsOverride) -> JobOptionsOverride {
        JobOptionsOverride {
            max_attempts: self.max_attempts.or(lower.max_attempts),
            backoff: self.backoff.or(lower.backoff),
            initial_delay_ms: self.initial_delay_ms.or(lower.initial_delay_ms),
            priority: self.priority.or(lower.priority),
            remove_on_complete: self.remove_on_complete.or(lower.remove_on_complete),
            remove_on_fail: self.remove_on_fail.or(lower.remove_on_fail),
        }
    }

    /// Resolve against fully specified base options
    pub fn merge_over(&self, base: &JobOptions) -> JobOptions {
        JobOptions {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            backoff: self.backoff.unwrap_or(base.backoff),
            initial_delay_ms: self.initial_delay_ms.unwrap_or(base.initial_delay_ms),
            priority: self.priority.unwrap_or(base.priority),
            remove_on_complete: self.remove_on_complete.unwrap_or(base.remove_on_complete),
            remove_on_fail: self.remove_on_fail.unwrap_or(base.remove_on_fail),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == JobOptionsOverride::default()
    }
}

/// A unit of work and its lifecycle record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub queue_name: String,
    pub type_name: String,
    pub payload: Value,
    pub options: JobOptions,
    pub state: JobState,
    pub attempts_made: u32,
    pub progress: Value,
    pub result: Option<Value>,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub stack_trace: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub ready_at: DateTime<Utc>,
    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub lock_token: Option<Uuid>,
    pub lock_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a new record in `delayed` or `waiting` depending on the delay
    pub fn new(
        id: JobId,
        queue_name: &str,
        type_name: &str,
        payload: Value,
        options: JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let delay = Duration::from_millis(options.initial_delay_ms);
        let state = if options.initial_delay_ms > 0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        Self {
            id,
            queue_name: queue_name.to_string(),
            type_name: type_name.to_string(),
            payload,
            options,
            state,
            attempts_made: 0,
            progress: Value::from(0),
            result: None,
            failure_reason: None,
            stack_trace: Vec::new(),
            created_at: now,
            ready_at: time_after(now, delay),
            processed_on: None,
            finished_on: None,
            lock_token: None,
            lock_expires_at: None,
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.ready_at <= now
    }

    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts_made < self.options.max_attempts
    }

    /// True while `token` is the live lock of this active job
    pub fn holds_lock(&self, token: Uuid) -> bool {
        self.state == JobState::Active && self.lock_token == Some(token)
    }

    pub fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.lock_expires_at.map_or(true, |expiry| expiry < now)
    }

    pub fn release_lock(&mut self) {
        self.lock_token = None;
        self.lock_expires_at = None;
    }

    /// Timestamp a job's age is measured from when cleaning its state
    pub fn age_reference(&self) -> DateTime<Utc> {
        match self.state {
            JobState::Completed | JobState::Failed => self.finished_on.unwrap_or(self.created_at),
            JobState::Active => self.processed_on.unwrap_or(self.created_at),
            JobState::Delayed | JobState::Waiting => self.created_at,
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            queue_name: self.queue_name.clone(),
            type_name: self.type_name.clone(),
            payload: self.payload.clone(),
            state: self.state,
            progress: self.progress.clone(),
            result: self.result.clone(),
            failure_reason: self.failure_reason.clone(),
            stack_trace: self.stack_trace.clone(),
            attempts_made: self.attempts_made,
            max_attempts: self.options.max_attempts,
            delay_ms: self.options.initial_delay_ms,
            created_at: self.created_at,
            processed_on: self.processed_on,
            finished_on: self.finished_on,
        }
    }
}

/// Read-only view of a job returned by status queries
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobId,
    pub queue_name: String,
    pub type_name: String,
    pub payload: Value,
    pub state: JobState,
    pub progress: Value,
    pub result: Option<Value>,
    pub failure_reason: Option<String>,
    pub stack_trace: Vec<String>,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub created_at: DateTime<Utc>,
    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
}

/// Job counts by state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

impl QueueCounts {
    pub fn get(&self, state: JobState) -> usize {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Delayed => self.delayed,
        }
    }

    pub fn set(&mut self, state: JobState, count: usize) {
        let slot = match state {
            JobState::Waiting => &mut self.waiting,
            JobState::Active => &mut self.active,
            JobState::Completed => &mut self.completed,
            JobState::Failed => &mut self.failed,
            JobState::Delayed => &mut self.delayed,
        };
        *slot = count;
    }

    pub fn total(&self) -> usize {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub name: String,
    #[serde(flatten)]
    pub counts: QueueCounts,
    pub paused: bool,
    /// Set when the queue's status could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueStatus {
    /// Zeroed entry standing in for a queue whose status failed to load
    pub fn unavailable(name: &str, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            counts: QueueCounts::default(),
            paused: false,
            error: Some(error.into()),
        }
    }
}

/// Persisted per-queue metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMeta {
    pub name: String,
    pub paused: bool,
    #[serde(default)]
    pub default_options: JobOptionsOverride,
}

impl QueueMeta {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            paused: false,
            default_options: JobOptionsOverride::default(),
        }
    }
}
