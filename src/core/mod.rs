//! Core services and infrastructure

pub mod error_handling;
pub mod logging;
pub mod retry;
pub mod shutdown;
pub mod styles; // shared palette for tables and clap help
pub mod sync;
pub mod time;
pub mod validation;
pub mod version;
