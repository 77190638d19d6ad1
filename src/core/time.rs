//! Time provider abstraction for testable time-dependent logic
//!
//! Job readiness, lock expiry and retention all compare against "now". The
//! store and the engine read it through [`TimeProvider`] so tests can move
//! the clock forward instead of sleeping.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Abstraction over wall-clock time
pub trait TimeProvider: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Production time provider using the system clock
#[derive(Debug, Default, Clone)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests and simulations
#[derive(Debug, Clone)]
pub struct ManualTimeProvider {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for ManualTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualTimeProvider {
    /// Create a manual clock starting at the current system time
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current = time_after(*current, duration);
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current = instant;
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Convert a std duration into a chrono duration, saturating on overflow
pub fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

/// `instant + duration`, clamped to the latest representable time
pub fn time_after(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    instant
        .checked_add_signed(to_chrono(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `instant - duration`, clamped to the earliest representable time
pub fn time_before(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    instant
        .checked_sub_signed(to_chrono(duration))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Shared default clock
pub fn system_clock() -> Arc<dyn TimeProvider> {
    Arc::new(SystemTimeProvider)
}
