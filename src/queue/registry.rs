//! Queue registry
//!
//! Creates queues lazily on first reference and owns their metadata
//! (paused flag, default job options). Metadata lives in the job store;
//! the registry only serialises metadata writes so concurrent first
//! references create a queue exactly once.

use crate::core::validation::validate_name;
use crate::notifications::api::{Event, EventNotifier, QueueEvent, QueueEventType};
use crate::queue::error::QueueResult;
use crate::queue::job::{JobOptionsOverride, QueueMeta};
use crate::queue::store::JobStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct QueueRegistry {
    store: Arc<dyn JobStore>,
    notifier: EventNotifier,
    /// Configured defaults applied when a queue is first created
    configured_defaults: HashMap<String, JobOptionsOverride>,
    meta_lock: Mutex<()>,
}

impl QueueRegistry {
    pub fn new(
        store: Arc<dyn JobStore>,
        notifier: EventNotifier,
        configured_defaults: HashMap<String, JobOptionsOverride>,
    ) -> Self {
        Self {
            store,
            notifier,
            configured_defaults,
            meta_lock: Mutex::new(()),
        }
    }

    /// Return the queue's metadata, creating the queue if it is new
    pub async fn ensure(&self, name: &str) -> QueueResult<QueueMeta> {
        validate_name("queueName", name)?;
        if let Some(meta) = self.store.queue_meta(name).await? {
            return Ok(meta);
        }

        let _guard = self.meta_lock.lock().await;
        if let Some(meta) = self.store.queue_meta(name).await? {
            return Ok(meta);
        }
        self.create_locked(name).await
    }

    async fn create_locked(&self, name: &str) -> QueueResult<QueueMeta> {
        let mut meta = QueueMeta::new(name);
        if let Some(defaults) = self.configured_defaults.get(name) {
            meta.default_options = defaults.clone();
        }
        self.store.save_queue_meta(meta.clone()).await?;

        log::debug!("Created \"{}\" queue", name);
        self.notifier
            .publish(Event::Queue(QueueEvent::new(QueueEventType::Created, name)));
        Ok(meta)
    }

    /// Metadata of an existing queue without creating it
    pub async fn get(&self, name: &str) -> QueueResult<Option<QueueMeta>> {
        Ok(self.store.queue_meta(name).await?)
    }

    pub async fn is_paused(&self, name: &str) -> QueueResult<bool> {
        Ok(self
            .store
            .queue_meta(name)
            .await?
            .is_some_and(|meta| meta.paused))
    }

    /// Set the paused flag; returns `true` when the flag actually changed
    pub async fn set_paused(&self, name: &str, paused: bool) -> QueueResult<bool> {
        validate_name("queueName", name)?;
        let _guard = self.meta_lock.lock().await;
        let mut meta = match self.store.queue_meta(name).await? {
            Some(meta) => meta,
            None => self.create_locked(name).await?,
        };
        if meta.paused == paused {
            return Ok(false);
        }
        meta.paused = paused;
        self.store.save_queue_meta(meta).await?;

        let event_type = if paused {
            QueueEventType::Paused
        } else {
            QueueEventType::Resumed
        };
        self.notifier
            .publish(Event::Queue(QueueEvent::new(event_type, name)));
        Ok(true)
    }

    /// Replace the queue's default job options
    pub async fn set_default_options(
        &self,
        name: &str,
        defaults: JobOptionsOverride,
    ) -> QueueResult<()> {
        validate_name("queueName", name)?;
        let _guard = self.meta_lock.lock().await;
        let mut meta = match self.store.queue_meta(name).await? {
            Some(meta) => meta,
            None => self.create_locked(name).await?,
        };
        meta.default_options = defaults;
        self.store.save_queue_meta(meta).await?;
        Ok(())
    }

    pub async fn names(&self) -> QueueResult<Vec<String>> {
        Ok(self.store.queue_names().await?)
    }

    /// Announce that every known queue is closing
    pub async fn close_all(&self) -> QueueResult<Vec<String>> {
        let names = self.names().await?;
        for name in &names {
            self.notifier
                .publish(Event::Queue(QueueEvent::new(QueueEventType::Closed, name)));
        }
        log::debug!("Closed {} queues", names.len());
        Ok(names)
    }
}
