//! Shared helpers for integration tests

#![allow(dead_code)]

use jobqueue::core::time::ManualTimeProvider;
use jobqueue::queue::api::{EngineConfig, MemoryJobStore, QueueManager};
use std::sync::Arc;
use std::time::Duration;

pub struct Engine {
    pub manager: QueueManager,
    pub store: Arc<MemoryJobStore>,
    pub clock: ManualTimeProvider,
}

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        tick_interval: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
        drain_timeout: Duration::from_secs(2),
        ..EngineConfig::default()
    }
}

/// Engine on a manual clock over a fresh store
pub fn manual_engine() -> Engine {
    let clock = ManualTimeProvider::new();
    engine_over(Arc::new(MemoryJobStore::with_clock(Arc::new(clock.clone()))), clock)
}

pub fn engine_over(store: Arc<MemoryJobStore>, clock: ManualTimeProvider) -> Engine {
    let manager = QueueManager::with_store(fast_config(), store.clone(), Arc::new(clock.clone()));
    Engine {
        manager,
        store,
        clock,
    }
}
