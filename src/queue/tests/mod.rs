//! Engine-level tests driven through the QueueManager facade
//!
//! - `lifecycle`: attempts, backoff, delays and retention of single jobs
//! - `admin`: pause/resume, removal, cleaning and manual retry
//! - `dispatcher`: promotion and stalled-job recovery on a manual clock
//! - `pool`: running engines, bounded concurrency, exclusive claims, drain

pub(crate) mod support;

pub mod admin;
pub mod dispatcher;
