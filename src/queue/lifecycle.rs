//! Job state transitions shared by the worker pool, the dispatcher and the
//! administrative facade
//!
//! Each transition is a guard plus a mutation applied inside
//! [`JobStore::update`], so a transition only lands when the job is still in
//! the state the caller observed.

use crate::core::retry::compute_delay;
use crate::core::time::time_after;
use crate::queue::error::{HandlerError, StoreResult};
use crate::queue::job::{Job, JobState};
use crate::queue::store::JobStore;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Failure reason recorded when a stalled job has no attempts left
pub const STALLED_REASON: &str = "job stalled more than allowable limit";

/// Delayed job whose delay has elapsed becomes waiting
pub(crate) fn promote(job: &mut Job, now: DateTime<Utc>) -> bool {
    if job.state != JobState::Delayed || !job.is_ready(now) {
        return false;
    }
    job.state = JobState::Waiting;
    true
}

/// Release an active job whose lock is gone
///
/// With attempts left the job returns to waiting without an extra attempt
/// charge; otherwise it fails with [`STALLED_REASON`]. `token` restricts the
/// transition to one specific lock; `None` accepts any expired lock.
pub(crate) fn release_stalled(job: &mut Job, now: DateTime<Utc>, token: Option<Uuid>) -> bool {
    let eligible = match token {
        Some(token) => job.holds_lock(token),
        None => job.lock_expired(now),
    };
    if !eligible {
        return false;
    }

    job.release_lock();
    if job.has_attempts_remaining() {
        job.state = JobState::Waiting;
        job.ready_at = now;
    } else {
        job.state = JobState::Failed;
        job.failure_reason = Some(STALLED_REASON.to_string());
        job.finished_on = Some(now);
    }
    true
}

pub(crate) fn complete(job: &mut Job, token: Uuid, result: Value, now: DateTime<Utc>) -> bool {
    if !job.holds_lock(token) {
        return false;
    }
    job.release_lock();
    job.state = JobState::Completed;
    job.result = Some(result);
    job.failure_reason = None;
    job.stack_trace.clear();
    job.finished_on = Some(now);
    true
}

/// Record a failed attempt: back to waiting with a backoff, or failed for good
pub(crate) fn fail_attempt(
    job: &mut Job,
    token: Uuid,
    error: &HandlerError,
    now: DateTime<Utc>,
    backoff_ceiling: Duration,
) -> bool {
    if !job.holds_lock(token) {
        return false;
    }
    job.release_lock();
    job.failure_reason = Some(error.message.clone());
    job.stack_trace = error.stack.clone();

    if job.has_attempts_remaining() {
        let delay = compute_delay(&job.options.backoff, job.attempts_made, backoff_ceiling);
        job.state = JobState::Waiting;
        job.ready_at = time_after(now, delay);
    } else {
        job.state = JobState::Failed;
        job.finished_on = Some(now);
    }
    true
}

/// Administrative retry of a failed job
pub(crate) fn reset_for_retry(job: &mut Job, now: DateTime<Utc>) -> bool {
    if job.state != JobState::Failed {
        return false;
    }
    job.state = JobState::Waiting;
    job.attempts_made = 0;
    job.ready_at = now;
    job.failure_reason = None;
    job.stack_trace.clear();
    job.finished_on = None;
    job.processed_on = None;
    job.result = None;
    true
}

/// Enforce the finished job's retention option on its state
///
/// Returns the number of jobs removed.
pub(crate) async fn apply_retention(store: &dyn JobStore, job: &Job) -> StoreResult<usize> {
    let retention = match job.state {
        JobState::Completed => job.options.remove_on_complete,
        JobState::Failed => job.options.remove_on_fail,
        _ => return Ok(0),
    };

    let removed = match retention.keep_count() {
        None => 0,
        Some(0) => usize::from(store.remove(&job.queue_name, job.id).await?.is_some()),
        Some(keep) => store.trim_state(&job.queue_name, job.state, keep).await?.len(),
    };
    if removed > 0 {
        log::trace!(
            "Retention removed {} {} jobs from \"{}\" queue",
            removed,
            job.state,
            job.queue_name
        );
    }
    Ok(removed)
}
