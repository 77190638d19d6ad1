//! Job Queue Engine
//!
//! Durable multi-queue job dispatch with delayed and retried delivery,
//! bounded worker concurrency, progress tracking and administrative control.
//!
//! # Overview
//!
//! - **Job Store** (`store`, `memory`): persistence with atomic claim-and-lock
//! - **Snapshot Lock** (`snapshot_lock`): one writer per snapshot file
//! - **Queue Registry** (`registry`): lazily created queues and their metadata
//! - **Dispatcher** (`dispatcher`): promotes delayed jobs, recovers stalled ones
//! - **Worker Pool** (`worker`): per (queue, type) bounded-concurrency handlers
//! - **Queue Manager** (`manager`): the facade tying them together
//!
//! # Job lifecycle
//!
//! ```text
//!  enqueue ──► delayed ──(ready_at elapsed)──┐
//!     │                                      ▼
//!     └───────────────────────────────────► waiting ◄─────────────────┐
//!                                            │ claim (attempt+1, lock)  │
//!                                            ▼                          │
//!                                          active ──(error, attempts    │
//!                                          │  │      left: backoff)─────┤
//!                            handler ok ◄──┘  └──► lock expired ────────┘
//!                                │                 (no extra charge)
//!                                ▼
//!                            completed        failed ◄── error, no attempts left
//!                                                │
//!                                                └── retry_job ──► waiting
//! ```
//!
//! The store is the single source of truth; components hold no job state
//! between store calls.

mod dispatcher;
mod error;
pub mod job;
mod lifecycle;
mod manager;
mod memory;
mod payload;
mod registry;
mod snapshot_lock;
mod store;
mod worker;

pub mod api;

#[cfg(test)]
mod tests;
