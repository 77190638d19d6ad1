//! Durable multi-queue job engine
//!
//! The [`queue`] module holds the engine (store, dispatcher, workers and the
//! [`queue::api::QueueManager`] facade), [`notifications`] the event bus and
//! [`app`] the `jobqueue` binary's command line layer.

pub mod app;
pub mod core;
pub mod notifications;
pub mod queue;
