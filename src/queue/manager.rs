use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use crate::{
    queue::{
        Error, ImportQueue, ItemStatus, MigrationConfig, QueueItem, QueueSettings,
        QueueStatistics, QueueStatus, Schedule, ScheduleKind,
        events::{NullListener, QueueListener},
        pipeline::ItemProcessor,
        schedule,
        store::QueueStore,
    },
    source::GenericArticle,
    warning,
};

/// Requests a pause of the running queue. Takes effect before the next
/// batch starts.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Parameters of a queue to be created.
#[derive(Debug, Clone)]
pub struct NewQueue {
    pub name: String,
    pub description: Option<String>,
    pub config: MigrationConfig,
    pub settings: QueueSettings,
    pub schedule: Option<Schedule>,
}

impl NewQueue {
    pub fn new(name: impl Into<String>, config: MigrationConfig) -> Self {
        Self {
            name: name.into(),
            description: None,
            config,
            settings: QueueSettings::default(),
            schedule: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn settings(mut self, settings: QueueSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }
}

enum Outcome {
    Done,
    Paused,
}

/// Owns every known queue and runs at most one of them at a time.
pub struct QueueManager<P> {
    queues: IndexMap<String, ImportQueue>,
    store: QueueStore,
    processor: P,
    listener: Arc<dyn QueueListener>,
    pause: PauseHandle,
    active: Option<String>,
}

impl<P: ItemProcessor> QueueManager<P> {
    pub fn new(store: QueueStore, processor: P) -> Self {
        Self {
            queues: IndexMap::new(),
            store,
            processor,
            listener: Arc::new(NullListener),
            pause: PauseHandle::default(),
            active: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn QueueListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Rehydrate persisted queues. Returns how many were loaded.
    pub async fn load(&mut self) -> Result<usize, Error> {
        let loaded = self.store.load_all().await?;
        let count = loaded.len();
        for queue in loaded {
            self.queues.insert(queue.id.clone(), queue);
        }
        info!(count, "loaded queues");
        Ok(count)
    }

    pub fn queue(&self, id: &str) -> Option<&ImportQueue> {
        self.queues.get(id)
    }

    pub fn queues(&self) -> impl Iterator<Item = &ImportQueue> {
        self.queues.values()
    }

    pub fn statistics(&self, id: &str) -> Option<&QueueStatistics> {
        self.queues.get(id).map(|queue| &queue.statistics)
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    /// Pause the active queue at the next batch boundary.
    pub fn pause(&self) {
        if self.active.is_some() {
            self.pause.pause();
        }
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut ImportQueue, Error> {
        self.queues
            .get_mut(id)
            .ok_or_else(|| Error::QueueNotFound(id.to_string()))
    }

    pub async fn create_queue(
        &mut self,
        new: NewQueue,
        articles: Vec<GenericArticle>,
    ) -> Result<String, Error> {
        let now = Utc::now();
        let items = articles
            .into_iter()
            .map(|article| QueueItem::new(article, now))
            .collect::<Vec<_>>();
        let mut queue = ImportQueue {
            id: ImportQueue::new_id(),
            name: new.name,
            description: new.description,
            items,
            config: new.config,
            settings: new.settings,
            status: QueueStatus::Idle,
            schedule: new.schedule,
            statistics: QueueStatistics::default(),
            created_at: now,
            updated_at: now,
        };
        queue.statistics.refresh(&queue.items);
        self.store.save(&queue).await?;
        info!(queue_id = queue.id, items = queue.items.len(), "created queue");
        let id = queue.id.clone();
        self.queues.insert(id.clone(), queue);
        Ok(id)
    }

    /// Append articles as pending items. Returns the number added.
    pub async fn add_articles(
        &mut self,
        id: &str,
        articles: Vec<GenericArticle>,
    ) -> Result<usize, Error> {
        let queue = self.get_mut(id)?;
        let now = Utc::now();
        let added = articles.len();
        queue
            .items
            .extend(articles.into_iter().map(|article| QueueItem::new(article, now)));
        queue.statistics.refresh(&queue.items);
        queue.touch();
        self.store.save(&self.queues[id]).await?;
        Ok(added)
    }

    /// Process every runnable item of the queue. Returns when the queue
    /// completed or paused.
    pub async fn run_queue(&mut self, id: &str) -> Result<QueueStatistics, Error> {
        if self.active.is_some() {
            return Err(Error::AlreadyProcessing);
        }
        let queue = self.get_mut(id)?;
        queue.status = QueueStatus::Processing;
        queue.statistics.start_time = Some(Utc::now());
        queue.statistics.end_time = None;
        queue.touch();
        self.store.save(&self.queues[id]).await?;
        self.listener.queue_start(&self.queues[id]);
        self.drive(id).await
    }

    /// Continue a paused queue.
    pub async fn resume(&mut self, id: &str) -> Result<QueueStatistics, Error> {
        if self.active.is_some() {
            return Err(Error::AlreadyProcessing);
        }
        let queue = self.get_mut(id)?;
        if queue.status != QueueStatus::Paused {
            debug!(queue_id = id, status = ?queue.status, "resume of a queue that is not paused");
        }
        queue.status = QueueStatus::Processing;
        queue.touch();
        self.store.save(&self.queues[id]).await?;
        self.listener.queue_resume(&self.queues[id]);
        self.drive(id).await
    }

    async fn drive(&mut self, id: &str) -> Result<QueueStatistics, Error> {
        self.active = Some(id.to_string());
        self.pause.clear();
        let outcome = self.process(id).await;
        self.active = None;
        let listener = self.listener.clone();
        let queue = self.get_mut(id)?;
        match outcome {
            Ok(Outcome::Done) => {
                queue.status = QueueStatus::Completed;
                queue.statistics.end_time = Some(Utc::now());
                queue.statistics.estimated_time_remaining_ms = Some(0);
                queue.touch();
                info!(
                    queue_id = id,
                    succeeded = queue.statistics.succeeded,
                    failed = queue.statistics.failed,
                    skipped = queue.statistics.skipped,
                    "queue completed"
                );
                self.store.save(&self.queues[id]).await?;
                listener.queue_complete(&self.queues[id]);
            }
            Ok(Outcome::Paused) => {
                queue.status = QueueStatus::Paused;
                queue.touch();
                info!(queue_id = id, "queue paused");
                self.store.save(&self.queues[id]).await?;
                listener.queue_pause(&self.queues[id]);
            }
            Err(error) => {
                error!(%error, queue_id = id, "queue failed");
                queue.status = QueueStatus::Failed;
                queue.touch();
                if let Err(save_error) = self.store.save(&self.queues[id]).await {
                    warn!(error = %save_error, queue_id = id, "Failed to persist failed queue");
                }
                listener.queue_error(&self.queues[id], &error.to_string());
                return Err(error);
            }
        }
        Ok(self.queues[id].statistics.clone())
    }

    async fn process(&mut self, id: &str) -> Result<Outcome, Error> {
        let queue = self.get_mut(id)?;
        let max_retries = queue.config.retry.max_retries;
        let batch_size = queue.config.batch_size.max(1);
        let mut work = queue
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| match item.status {
                ItemStatus::Pending | ItemStatus::Processing => true,
                ItemStatus::Failed => item.retry_count < max_retries,
                ItemStatus::Completed | ItemStatus::Skipped => false,
            })
            .map(|(index, _)| index)
            .collect::<VecDeque<_>>();

        while !work.is_empty() {
            if self.pause.is_paused() {
                return Ok(Outcome::Paused);
            }
            let batch = work
                .drain(..batch_size.min(work.len()))
                .collect::<Vec<_>>();
            let retries = self.run_batch(id, &batch).await?;
            work.extend(retries);

            let listener = self.listener.clone();
            let queue = self.get_mut(id)?;
            queue.statistics.refresh(&queue.items);
            let stats = &mut queue.statistics;
            if let Some(start) = stats.start_time {
                let elapsed = (Utc::now() - start).num_milliseconds().max(1) as f64;
                if stats.processed > 0 {
                    let rate = stats.processed as f64 / elapsed;
                    let remaining = stats.total_items.saturating_sub(stats.processed);
                    stats.estimated_time_remaining_ms = Some((remaining as f64 / rate) as u64);
                }
            }
            queue.touch();
            let queue = &self.queues[id];
            listener.progress(
                queue,
                queue.statistics.processed,
                queue.statistics.total_items,
                queue.statistics.percentage(),
            );
            self.store.save(queue).await?;
        }
        Ok(Outcome::Done)
    }

    /// Run one batch concurrently and apply the outcomes in item order.
    /// Returns the items to retry.
    async fn run_batch(&mut self, id: &str, batch: &[usize]) -> Result<Vec<usize>, Error> {
        let wake_at = {
            let queue = self.get_mut(id)?;
            for &index in batch {
                queue.items[index].status = ItemStatus::Processing;
            }
            batch
                .iter()
                .filter_map(|&index| queue.items[index].next_attempt_at)
                .max()
        };
        if let Some(wait) = wake_at.and_then(|at| (at - Utc::now()).to_std().ok()) {
            debug!(queue_id = id, ?wait, "waiting for retry backoff");
            tokio::time::sleep(wait).await;
        }

        let queue = &self.queues[id];
        let processor = &self.processor;
        let listener = &self.listener;
        let outcomes = join_all(batch.iter().map(|&index| {
            let item = &queue.items[index];
            listener.item_start(queue, item);
            warning::scoped(processor.process(item, &queue.config, &queue.settings))
        }))
        .await;

        let listener = self.listener.clone();
        let pause = self.pause.clone();
        let queue = self.get_mut(id)?;
        let max_retries = queue.config.retry.max_retries;
        let backoff = queue.config.retry.backoff;
        let pause_on_error = queue.settings.pause_on_error;
        let now = Utc::now();
        let mut retries = Vec::new();
        for (&index, (outcome, warnings)) in batch.iter().zip(outcomes) {
            let item = &mut queue.items[index];
            item.processed_at = Some(now);
            item.warnings.extend(warnings);
            match outcome {
                Ok(result) => {
                    item.status = if result.skipped {
                        ItemStatus::Skipped
                    } else {
                        ItemStatus::Completed
                    };
                    item.error = None;
                    item.next_attempt_at = None;
                    item.result = Some(result);
                    let item = &queue.items[index];
                    if let Some(result) = &item.result {
                        listener.item_complete(queue, item, result);
                    }
                }
                Err(error) => {
                    let message = error.to_string();
                    item.retry_count += 1;
                    item.error = Some(message.clone());
                    if item.retry_count < max_retries {
                        item.status = ItemStatus::Pending;
                        let attempt = item.retry_count;
                        item.next_attempt_at = chrono::Duration::from_std(backoff.delay(attempt))
                            .ok()
                            .map(|delay| now + delay);
                        warn!(%error, queue_id = id, item_id = item.id, attempt, "item failed, retrying");
                        retries.push(index);
                        listener.item_retry(queue, &queue.items[index], attempt);
                    } else {
                        item.status = ItemStatus::Failed;
                        item.next_attempt_at = None;
                        error!(%error, queue_id = id, item_id = item.id, "item failed");
                        listener.item_error(queue, &queue.items[index], &message);
                        if pause_on_error {
                            pause.pause();
                        }
                    }
                }
            }
        }
        Ok(retries)
    }

    /// Reset a queue to idle. Interrupted items go back to pending.
    pub async fn cancel(&mut self, id: &str) -> Result<(), Error> {
        if self.active.as_deref() == Some(id) {
            self.active = None;
            self.pause.clear();
        }
        let queue = self.get_mut(id)?;
        queue.status = QueueStatus::Idle;
        for item in &mut queue.items {
            if item.status == ItemStatus::Processing {
                item.status = ItemStatus::Pending;
            }
        }
        queue.touch();
        self.store.save(&self.queues[id]).await?;
        Ok(())
    }

    pub async fn delete_queue(&mut self, id: &str) -> Result<(), Error> {
        if self.active.as_deref() == Some(id) {
            self.cancel(id).await?;
        }
        if self.queues.shift_remove(id).is_none() {
            return Err(Error::QueueNotFound(id.to_string()));
        }
        self.store.delete(id).await?;
        Ok(())
    }

    pub fn export_queue(&self, id: &str) -> Result<String, Error> {
        let queue = self
            .queues
            .get(id)
            .ok_or_else(|| Error::QueueNotFound(id.to_string()))?;
        Ok(serde_json::to_string_pretty(queue)?)
    }

    /// Register an exported queue under a fresh id.
    pub async fn import_queue(&mut self, data: &str) -> Result<String, Error> {
        let mut queue = serde_json::from_str::<ImportQueue>(data)
            .inspect_err(|error| error!(%error, "Failed to parse queue export"))?;
        queue.id = ImportQueue::new_id();
        if queue.status == QueueStatus::Processing {
            queue.status = QueueStatus::Idle;
        }
        queue.touch();
        self.store.save(&queue).await?;
        let id = queue.id.clone();
        self.queues.insert(id.clone(), queue);
        Ok(id)
    }

    /// Run the first queue whose schedule is due at `now`. Completed
    /// recurring queues are re-armed before they run again.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<String>, Error> {
        if self.active.is_some() {
            return Ok(None);
        }
        let due = self.queues.values().find(|queue| {
            let Some(schedule) = &queue.schedule else {
                return false;
            };
            let runnable = match queue.status {
                QueueStatus::Idle => true,
                QueueStatus::Completed => schedule.kind == ScheduleKind::Recurring,
                _ => false,
            };
            runnable && schedule::due(schedule, now)
        });
        let Some(id) = due.map(|queue| queue.id.clone()) else {
            return Ok(None);
        };

        let queue = self.get_mut(&id)?;
        if queue.status == QueueStatus::Completed {
            for item in &mut queue.items {
                item.status = ItemStatus::Pending;
                item.retry_count = 0;
                item.error = None;
                item.next_attempt_at = None;
            }
            queue.statistics = QueueStatistics::default();
            queue.statistics.refresh(&queue.items);
        }
        if let Some(schedule) = &mut queue.schedule {
            schedule.last_run = Some(now);
            schedule.next_run = schedule::next_run(schedule, now);
        }
        info!(queue_id = id, "running scheduled queue");
        self.run_queue(&id).await?;
        Ok(Some(id))
    }
}
