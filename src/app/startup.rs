//! Process startup and subcommand dispatch
//!
//! Startup runs in three stages: parse the command line (help colors follow
//! the terminal), load the configuration file and lay the flags over it,
//! then install logging and hand off to the subcommand.

use crate::app::cli::args::{Args, Command};
use crate::app::cli::config::{load_config, AppConfig};
use crate::app::cli::display::{job_status_table, queue_status_table, to_json};
use crate::app::processors::{register_builtin_processors, ProcessorTiming};
use crate::core::error_handling::{log_error_with_context, render_for_user};
use crate::core::logging::init_logging;
use crate::core::time::system_clock;
use crate::core::version::long_version;
use crate::notifications::api::{EventFilter, LoggingSubscriber};
use crate::queue::api::{
    MemoryJobStore, QueueError, QueueManager, QueueResult, SnapshotLock, StoreError,
};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Run the binary and return its exit status
pub async fn startup() -> i32 {
    let terminal_color =
        std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();

    let args = match Args::try_parse_styled(std::env::args_os(), terminal_color) {
        Ok(args) => args,
        Err(e) => {
            // --help and --version land here too
            let _ = e.print();
            return e.exit_code();
        }
    };

    let mut config = match load_config(args.config_file.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", render_for_user(&e, "Loading configuration"));
            return EXIT_USAGE;
        }
    };
    config.apply_args(&args);
    let use_color = config.color.unwrap_or(terminal_color);

    let log_file = config
        .log_file
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());
    if let Err(e) = init_logging(
        config.log_level.as_deref(),
        config.log_format.as_deref(),
        log_file.as_deref(),
        use_color,
    ) {
        eprintln!("Failed to initialise logging: {}", e);
        return EXIT_USAGE;
    }
    log::debug!("jobqueue {}", long_version());
    log::debug!("Effective configuration: {:?}", config);

    match dispatch(args.command, &config, use_color).await {
        Ok(()) => EXIT_OK,
        Err(e) => {
            log_error_with_context(&e, "Command failed");
            eprintln!("{}", render_for_user(&e, "Command failed"));
            EXIT_FAILURE
        }
    }
}

async fn open_manager(config: &AppConfig) -> QueueResult<(QueueManager, Arc<MemoryJobStore>)> {
    let clock = system_clock();
    let store = Arc::new(MemoryJobStore::open(&config.store_path(), clock.clone()).await?);
    let manager = QueueManager::with_store(config.engine_config(), store.clone(), clock);
    Ok((manager, store))
}

async fn dispatch(command: Command, config: &AppConfig, use_color: bool) -> QueueResult<()> {
    let store_path = config.store_path();
    // Writers hold the lock from load to save; a running engine holds it throughout
    let _lock = if command.writes_store() {
        Some(SnapshotLock::acquire(&store_path)?)
    } else {
        None
    };
    let (manager, store) = open_manager(config).await?;

    if let Command::Run {
        snapshot_interval_ms,
    } = command
    {
        let interval = snapshot_interval_ms
            .map(Duration::from_millis)
            .filter(|d| !d.is_zero())
            .unwrap_or(config.snapshot_interval);
        return run_engine(&manager, &store, &store_path, config, interval).await;
    }

    if run_admin(command, &manager, use_color).await? {
        store.save_snapshot(&store_path).await?;
    }
    Ok(())
}

/// Run the engine until a signal arrives, snapshotting on `interval`
async fn run_engine(
    manager: &QueueManager,
    store: &MemoryJobStore,
    store_path: &Path,
    config: &AppConfig,
    interval: Duration,
) -> QueueResult<()> {
    register_builtin_processors(manager, config, ProcessorTiming::default())?;
    let _log_task = manager.attach(Arc::new(LoggingSubscriber::new("jobqueue:log")), EventFilter::All);

    let coordinator = manager.shutdown_coordinator();
    coordinator.install_signal_handlers();
    manager.start();
    log::info!(
        "Engine running; snapshots every {}ms to {}",
        interval.as_millis(),
        store_path.display()
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = coordinator.wait() => break,
            _ = ticker.tick() => {
                // A failed periodic snapshot is retried on the next tick
                if let Err(e) = store.save_snapshot(store_path).await {
                    log::warn!("Periodic snapshot failed: {}", e);
                }
            }
        }
    }

    log::info!("Shutdown requested; draining workers");
    let report = manager.shutdown().await?;
    if !report.drained {
        log::warn!(
            "{} jobs were still running at the drain timeout and were released",
            report.aborted.len()
        );
    }
    store.save_snapshot(store_path).await?;
    Ok(())
}

/// Run one administrative subcommand; returns true when the store changed
async fn run_admin(command: Command, manager: &QueueManager, use_color: bool) -> QueueResult<bool> {
    let changed = match command {
        Command::Run { .. } => false,
        Command::Enqueue(args) => {
            let payload = args.payload_value()?;
            let options = Some(args.options()).filter(|o| !o.is_empty());
            let job = manager
                .enqueue(&args.queue, &args.type_name, payload, options)
                .await?;
            println!(
                "Added job {} to \"{}\" queue ({})",
                job.id, job.queue_name, job.state
            );
            true
        }
        Command::Status { queue, json } => {
            let statuses = match queue {
                Some(queue) => vec![manager.get_queue_status(&queue).await?],
                None => manager.get_all_queues_status().await?,
            };
            if json {
                println!("{}", to_json(&statuses).map_err(StoreError::from)?);
            } else if statuses.is_empty() {
                println!("No queues.");
            } else {
                queue_status_table(&statuses, use_color).printstd();
            }
            false
        }
        Command::Job { queue, id, json } => {
            let status = manager
                .get_job_status(&queue, id)
                .await?
                .ok_or_else(|| QueueError::not_found(&queue, id))?;
            if json {
                println!("{}", to_json(&status).map_err(StoreError::from)?);
            } else {
                job_status_table(&status, use_color).printstd();
            }
            false
        }
        Command::Pause { queue } => {
            let changed = manager.pause_queue(&queue).await?;
            println!("Queue \"{}\" {}", queue, if changed { "paused" } else { "was already paused" });
            changed
        }
        Command::Resume { queue } => {
            let changed = manager.resume_queue(&queue).await?;
            println!("Queue \"{}\" {}", queue, if changed { "resumed" } else { "was not paused" });
            changed
        }
        Command::Clean {
            queue,
            grace_ms,
            state,
        } => {
            let removed = manager
                .clean_queue(&queue, Duration::from_millis(grace_ms), state)
                .await?;
            println!("Removed {} {} jobs from \"{}\"", removed.len(), state, queue);
            !removed.is_empty()
        }
        Command::Empty { queue } => {
            let removed = manager.empty_queue(&queue).await?;
            println!("Removed {} jobs from \"{}\"", removed, queue);
            removed > 0
        }
        Command::Retry { queue, id } => {
            let job = manager.retry_job(&queue, id).await?;
            println!("Job {} in \"{}\" is {} again", job.id, queue, job.state);
            true
        }
        Command::Remove { queue, id } => {
            let removed = manager.remove_job(&queue, id).await?;
            if removed {
                println!("Removed job {} from \"{}\"", id, queue);
            } else {
                println!("Job {} not found in \"{}\"", id, queue);
            }
            removed
        }
    };
    Ok(changed)
}
