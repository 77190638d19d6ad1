//! Command line arguments
//!
//! Global flags override the configuration file; each subcommand carries its
//! own arguments. Administrative subcommands work on the snapshot file named
//! by `--store-file` (or `store-file` in the configuration); those that write
//! it are refused while `run` owns the file.

use crate::app::cli::config::MAX_DURATION_MS;
use crate::core::retry::BackoffPolicy;
use crate::core::styles::palette_to_clap;
use crate::core::validation::ValidationError;
use crate::queue::api::{JobId, JobOptionsOverride, JobState};
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "jobqueue")]
#[command(about = "Durable multi-queue job engine")]
#[command(version, long_version = crate::core::version::long_version())]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config-file", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Snapshot file holding queues and jobs
    #[arg(short = 's', long = "store-file", value_name = "FILE", global = true)]
    pub store_file: Option<PathBuf>,

    /// Force colored output (overrides TTY detection and NO_COLOR)
    #[arg(long = "color", global = true)]
    pub color: bool,

    /// Disable colored output
    #[arg(long = "no-color", conflicts_with = "color", global = true)]
    pub no_color: bool,

    /// Log level
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", global = true,
          value_parser = ["trace", "debug", "info", "warn", "error", "off"])]
    pub log_level: Option<String>,

    /// Log file path (use 'none' to disable file logging)
    #[arg(short = 'f', long = "log-file", value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(short = 'o', long = "log-format", value_name = "FORMAT", global = true,
          value_parser = ["text", "ext", "json"])]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the engine with the built-in processors until interrupted
    Run {
        /// How often the store is written to the snapshot file
        #[arg(
            long = "snapshot-interval-ms",
            value_name = "MS",
            value_parser = clap::value_parser!(u64).range(..=MAX_DURATION_MS)
        )]
        snapshot_interval_ms: Option<u64>,
    },
    /// Add a job to a queue
    Enqueue(EnqueueArgs),
    /// Show job counts for one queue or all queues
    Status {
        queue: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one job
    Job {
        queue: String,
        id: JobId,
        #[arg(long)]
        json: bool,
    },
    /// Stop workers claiming jobs from a queue
    Pause { queue: String },
    /// Let workers claim jobs from a paused queue again
    Resume { queue: String },
    /// Remove jobs in one state older than a grace period
    Clean {
        queue: String,
        /// Minimum age in milliseconds
        #[arg(long = "grace-ms", value_name = "MS", default_value_t = 0)]
        grace_ms: u64,
        #[arg(long, value_name = "STATE", default_value = "completed", value_parser = parse_state)]
        state: JobState,
    },
    /// Delete every job in a queue
    Empty { queue: String },
    /// Send a failed job back to the queue with a fresh attempt budget
    Retry { queue: String, id: JobId },
    /// Delete one job
    Remove { queue: String, id: JobId },
}

impl Command {
    /// Whether the subcommand writes the snapshot file
    pub fn writes_store(&self) -> bool {
        !matches!(self, Command::Status { .. } | Command::Job { .. })
    }
}

#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct EnqueueArgs {
    pub queue: String,

    #[arg(value_name = "TYPE")]
    pub type_name: String,

    /// Payload as a JSON document
    #[arg(value_name = "JSON")]
    pub payload: String,

    #[arg(long = "delay-ms", value_name = "MS")]
    pub delay_ms: Option<u64>,

    /// Larger values run first
    #[arg(long, allow_negative_numbers = true)]
    pub priority: Option<i32>,

    #[arg(long = "attempts", value_name = "N")]
    pub max_attempts: Option<u32>,

    #[arg(long, value_name = "KIND", value_parser = ["fixed", "exponential"], requires = "backoff_delay_ms")]
    pub backoff: Option<String>,

    #[arg(long = "backoff-delay-ms", value_name = "MS")]
    pub backoff_delay_ms: Option<u64>,
}

impl EnqueueArgs {
    pub fn payload_value(&self) -> Result<Value, ValidationError> {
        serde_json::from_str(&self.payload)
            .map_err(|e| ValidationError::new(format!("Payload is not valid JSON: {}", e)))
    }

    /// Per-job overrides given on the command line
    pub fn options(&self) -> JobOptionsOverride {
        let mut options = JobOptionsOverride::new();
        options.max_attempts = self.max_attempts;
        options.initial_delay_ms = self.delay_ms;
        options.priority = self.priority;
        options.backoff = match (self.backoff.as_deref(), self.backoff_delay_ms) {
            (Some("fixed"), Some(delay)) => Some(BackoffPolicy::fixed(delay)),
            (Some(_), Some(delay)) => Some(BackoffPolicy::exponential(delay)),
            _ => None,
        };
        options
    }
}

fn parse_state(value: &str) -> Result<JobState, String> {
    JobState::from_str(&value.to_ascii_lowercase()).map_err(|_| {
        format!(
            "unknown state '{}' (expected delayed, waiting, active, completed or failed)",
            value
        )
    })
}

impl Args {
    /// Parse with help colors following the output color choice
    pub fn try_parse_styled<I, T>(args: I, use_color: bool) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut matches = Self::command()
            .styles(palette_to_clap(use_color))
            .try_get_matches_from(args)?;
        Self::from_arg_matches_mut(&mut matches)
    }

    /// Color decision from the flags alone, before any configuration is read
    pub fn color_requested(&self) -> Option<bool> {
        match (self.color, self.no_color) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}
