//! Retry backoff policy for failed job attempts
//!
//! Computes how long a failed job waits before it becomes eligible for its
//! next attempt. The computation is pure so the worker pool, the dispatcher
//! and tests all agree on the same schedule.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default upper bound for exponential growth (30 minutes)
pub const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(30 * 60);

/// Default base delay applied when a job does not name one
pub const DEFAULT_BASE_DELAY_MS: u64 = 2000;

/// Shape of the delay curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every retry
    Fixed,
    /// Delay doubles with every attempt
    Exponential,
}

/// Backoff descriptor carried in each job's options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    pub base_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_BASE_DELAY_MS)
    }
}

impl BackoffPolicy {
    pub fn fixed(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay_ms,
        }
    }

    pub fn exponential(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay_ms,
        }
    }
}

/// Compute the delay before the next attempt
///
/// `attempts_made` is the number of attempts already charged, so the first
/// retry is computed with `attempts_made == 1`. Zero is treated as one.
///
/// # Examples
/// ```rust
/// use jobqueue::core::retry::{compute_delay, BackoffPolicy, DEFAULT_BACKOFF_CEILING};
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::exponential(2000);
/// assert_eq!(compute_delay(&policy, 1, DEFAULT_BACKOFF_CEILING), Duration::from_millis(2000));
/// assert_eq!(compute_delay(&policy, 3, DEFAULT_BACKOFF_CEILING), Duration::from_millis(8000));
/// ```
pub fn compute_delay(policy: &BackoffPolicy, attempts_made: u32, ceiling: Duration) -> Duration {
    match policy.kind {
        BackoffKind::Fixed => Duration::from_millis(policy.base_delay_ms).min(ceiling),
        BackoffKind::Exponential => {
            let exponent = attempts_made.max(1) - 1;
            // 2^exponent overflows u64 past 63; saturate instead
            let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
            let millis = policy.base_delay_ms.saturating_mul(factor);
            Duration::from_millis(millis).min(ceiling)
        }
    }
}
