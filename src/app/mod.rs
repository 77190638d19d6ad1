//! Application module

pub mod cli;
pub mod processors;
pub mod startup;
