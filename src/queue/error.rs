//! Queue Error Types

use crate::core::error_handling::ContextualError;
use crate::core::validation::ValidationError;
use crate::queue::job::{JobId, JobState};

/// Failures of the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job store unavailable: {0}")]
    Unavailable(String),

    #[error("Job store inconsistent: {0}")]
    Inconsistent(String),

    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot format version {found} does not match supported version {expected}")]
    FormatMismatch { expected: u32, found: u32 },

    #[error("Snapshot {path} is in use by process {pid}")]
    Locked { path: String, pid: u32 },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the queue facade
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Job {job_id} not found in \"{queue}\" queue")]
    NotFound { queue: String, job_id: JobId },

    #[error("Job {job_id} is {state}; operation requires {expected}")]
    InvalidState {
        job_id: JobId,
        state: JobState,
        expected: JobState,
    },

    #[error("No handler registered for type \"{type_name}\" in \"{queue}\" queue")]
    HandlerMissing { queue: String, type_name: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueueError {
    pub fn not_found(queue: &str, job_id: JobId) -> Self {
        QueueError::NotFound {
            queue: queue.to_string(),
            job_id,
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

impl ContextualError for StoreError {
    fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            StoreError::FormatMismatch { .. } | StoreError::Locked { .. }
        )
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            StoreError::FormatMismatch { .. } => {
                Some("Snapshot file was written by an incompatible version; remove it or use a matching build")
            }
            StoreError::Locked { .. } => {
                Some("Snapshot file is owned by a running engine; stop it or use a different store file")
            }
            _ => None,
        }
    }
}

impl ContextualError for QueueError {
    fn is_user_actionable(&self) -> bool {
        match self {
            QueueError::Validation(_)
            | QueueError::NotFound { .. }
            | QueueError::InvalidState { .. }
            | QueueError::HandlerMissing { .. } => true,
            QueueError::Store(e) => e.is_user_actionable(),
        }
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            QueueError::Validation(e) => Some(e.message()),
            QueueError::NotFound { .. } => Some("Job not found"),
            QueueError::InvalidState { .. } => Some("Job is not in a state that allows this operation"),
            QueueError::HandlerMissing { .. } => Some("No handler registered for this job type"),
            QueueError::Store(e) => e.user_message(),
        }
    }
}

/// Failure reported by a job handler
///
/// Captured into the job record (`failure_reason`, `stack_trace`); never
/// raised to administrative callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub stack: Vec<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
        }
    }

    /// Attach a context frame, innermost first
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        HandlerError::new(format!("invalid payload: {}", error))
    }
}
