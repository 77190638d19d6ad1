//! Public API for the job queue engine
//!
//! External modules should import from here rather than directly from
//! internal modules.

pub use crate::queue::manager::{EngineConfig, QueueManager, DEFAULT_DRAIN_TIMEOUT};

pub use crate::queue::lifecycle::STALLED_REASON;
pub use crate::queue::job::{
    Job, JobId, JobOptions, JobOptionsOverride, JobState, JobStatus, QueueCounts, QueueMeta,
    QueueStatus, Retention,
};
pub use crate::queue::payload::{
    validate_payload, Attachment, DataProcessingJob, EmailJob, JobPayload, NotificationJob,
    NotificationKind, Recipients, DATA_PROCESSING_QUEUE, EMAIL_QUEUE, NOTIFICATION_QUEUE,
    PROCESS_DATA, SEND_EMAIL, SEND_NOTIFICATION,
};

pub use crate::queue::worker::{
    handler_fn, DrainReport, FnHandler, JobContext, JobHandler, JobOutcome, WorkerSettings,
};
pub use crate::queue::dispatcher::TickReport;

pub use crate::queue::memory::{MemoryJobStore, StoreSnapshot};
pub use crate::queue::snapshot_lock::SnapshotLock;
pub use crate::queue::store::{mutation, JobMutation, JobStore, UpdateResult};

pub use crate::queue::error::{
    HandlerError, QueueError, QueueResult, StoreError, StoreResult,
};
