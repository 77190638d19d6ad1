//! Built-in processors for the three typed job kinds
//!
//! These simulate the work of sending an email, delivering a notification
//! and crunching a data task. Each reports progress 10, 50, 90 and 100 with
//! a pause between steps and returns a small JSON receipt.

use crate::app::cli::config::AppConfig;
use crate::queue::api::{
    handler_fn, DataProcessingJob, EmailJob, HandlerError, JobContext, JobHandler, NotificationJob,
    QueueManager, QueueResult, DATA_PROCESSING_QUEUE, EMAIL_QUEUE, NOTIFICATION_QUEUE,
    PROCESS_DATA, SEND_EMAIL, SEND_NOTIFICATION,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const EMAIL_CONCURRENCY: usize = 5;
pub const NOTIFICATION_CONCURRENCY: usize = 10;
pub const DATA_PROCESSING_CONCURRENCY: usize = 3;

/// Pause between progress steps for each processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorTiming {
    pub email_step: Duration,
    pub notification_step: Duration,
    pub data_step: Duration,
}

impl Default for ProcessorTiming {
    fn default() -> Self {
        Self {
            email_step: Duration::from_millis(1000),
            notification_step: Duration::from_millis(500),
            data_step: Duration::from_millis(2000),
        }
    }
}

impl ProcessorTiming {
    /// No pauses at all
    pub fn instant() -> Self {
        Self {
            email_step: Duration::ZERO,
            notification_step: Duration::ZERO,
            data_step: Duration::ZERO,
        }
    }
}

/// Register all three processors on `manager`
///
/// Concurrency comes from the `[queues.<name>]` section of the configuration
/// when present, otherwise the built-in defaults apply.
pub fn register_builtin_processors(
    manager: &QueueManager,
    config: &AppConfig,
    timing: ProcessorTiming,
) -> QueueResult<()> {
    log::info!("Initializing queue processors");

    manager.register_handler(
        EMAIL_QUEUE,
        SEND_EMAIL,
        config.concurrency_for(EMAIL_QUEUE, EMAIL_CONCURRENCY),
        email_processor(timing.email_step),
    )?;
    manager.register_handler(
        NOTIFICATION_QUEUE,
        SEND_NOTIFICATION,
        config.concurrency_for(NOTIFICATION_QUEUE, NOTIFICATION_CONCURRENCY),
        notification_processor(timing.notification_step),
    )?;
    manager.register_handler(
        DATA_PROCESSING_QUEUE,
        PROCESS_DATA,
        config.concurrency_for(DATA_PROCESSING_QUEUE, DATA_PROCESSING_CONCURRENCY),
        data_processing_processor(timing.data_step),
    )?;

    log::info!("All queue processors initialized");
    Ok(())
}

async fn step(ctx: &JobContext, progress: u8, pause: Duration) -> Result<(), HandlerError> {
    if !pause.is_zero() {
        tokio::time::sleep(pause).await;
    }
    let recorded = ctx
        .progress(progress)
        .await
        .map_err(|e| HandlerError::new(e.to_string()))?;
    if !recorded {
        return Err(HandlerError::new(format!(
            "lost lock on job {} at {}% progress",
            ctx.id(),
            progress
        )));
    }
    Ok(())
}

/// Report the standard progress sequence, pausing `pause` between steps
async fn run_steps(ctx: &JobContext, pause: Duration) -> Result<(), HandlerError> {
    step(ctx, 10, Duration::ZERO).await?;
    step(ctx, 50, pause).await?;
    step(ctx, 90, pause).await?;
    step(ctx, 100, Duration::ZERO).await
}

pub fn email_processor(pause: Duration) -> Arc<dyn JobHandler> {
    handler_fn(move |ctx| async move {
        let email: EmailJob = ctx.payload_as()?;
        log::info!("Processing email job {} to {:?}: {}", ctx.id(), email.to, email.subject);

        run_steps(&ctx, pause).await?;

        log::info!("Email job {} sent", ctx.id());
        Ok(json!({
            "success": true,
            "sentAt": chrono::Utc::now().to_rfc3339(),
            "recipients": email.to.to_vec(),
        }))
    })
}

pub fn notification_processor(pause: Duration) -> Arc<dyn JobHandler> {
    handler_fn(move |ctx| async move {
        let notification: NotificationJob = ctx.payload_as()?;
        log::info!(
            "Processing notification job {} for user {} ({})",
            ctx.id(),
            notification.user_id,
            notification.kind
        );

        run_steps(&ctx, pause).await?;

        Ok(json!({
            "success": true,
            "sentAt": chrono::Utc::now().to_rfc3339(),
            "userId": notification.user_id,
            "type": notification.kind,
        }))
    })
}

pub fn data_processing_processor(pause: Duration) -> Arc<dyn JobHandler> {
    handler_fn(move |ctx| async move {
        let task: DataProcessingJob = ctx.payload_as()?;
        log::info!(
            "Processing data job {} (task {}, {})",
            ctx.id(),
            task.task_id,
            task.kind
        );

        run_steps(&ctx, pause).await?;

        Ok(json!({
            "success": true,
            "processedAt": chrono::Utc::now().to_rfc3339(),
            "taskId": task.task_id,
            "type": task.kind,
            "result": {
                "message": "Data processed successfully",
                "recordsProcessed": record_count(&task.data),
            },
        }))
    })
}

fn record_count(data: &Value) -> usize {
    match data {
        Value::Array(items) => items.len(),
        Value::Object(fields) => fields.len(),
        Value::Null => 0,
        _ => 1,
    }
}
