//! Batched, resumable import queues.
//!
//! A queue holds one [`QueueItem`] per source article. [`manager::QueueManager`]
//! drives items through an [`pipeline::ItemProcessor`] in sequential batches,
//! persists every state change through [`store::QueueStore`] and reports to a
//! [`events::QueueListener`].

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    cms::upload::{OnExisting, PublishStatus, UploadResult},
    source::{ArticleId, GenericArticle},
};

pub mod events;
pub mod manager;
pub mod pipeline;
pub mod schedule;
pub mod store;

pub use events::{ChannelListener, NullListener, QueueEvent, QueueListener};
pub use manager::{NewQueue, PauseHandle, QueueManager};
pub use pipeline::{ImportPipeline, ItemProcessor};
pub use schedule::Scheduler;
pub use store::QueueStore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Queue '{0}' not found")]
    QueueNotFound(String),
    #[error("Another queue is already being processed")]
    AlreadyProcessing,
    #[error("Queue storage failed: {0}")]
    Store(#[from] store::Error),
    #[error("Invalid queue export: {0}")]
    Import(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Idle,
    Processing,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

fn default_initial_ms() -> u64 {
    1000
}

fn default_factor() -> f64 {
    2.0
}

fn default_max_ms() -> u64 {
    60_000
}

/// Exponential delay between attempts of the same item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            factor: default_factor(),
            max_ms: default_max_ms(),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_ms as f64 * self.factor.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.max_ms as f64) as u64)
    }
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per item, including the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: Backoff::default(),
        }
    }
}

fn default_collection() -> String {
    "posts".into()
}

fn default_batch_size() -> usize {
    10
}

/// Where and how the articles of one queue are imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub site_id: ArticleId,
    pub language: String,
    #[serde(default = "default_collection")]
    pub collection_name: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Source category → CMS category slug.
    #[serde(default)]
    pub category_mapping: Option<HashMap<String, String>>,
    /// Source author → CMS user email.
    #[serde(default)]
    pub author_mapping: Option<HashMap<String, String>>,
    #[serde(default)]
    pub status_mapping: Option<HashMap<String, PublishStatus>>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl MigrationConfig {
    pub fn new(site_id: ArticleId, language: impl Into<String>) -> Self {
        Self {
            site_id,
            language: language.into(),
            collection_name: default_collection(),
            batch_size: default_batch_size(),
            category_mapping: None,
            author_mapping: None,
            status_mapping: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub pause_on_error: bool,
    #[serde(default)]
    pub on_existing: OnExisting,
}

fn default_tick_secs() -> u64 {
    60
}

/// Defaults for queues created from the command line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueOptions {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default)]
    pub pause_on_error: bool,
    #[serde(default)]
    pub on_existing: OnExisting,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff: Backoff::default(),
            pause_on_error: false,
            on_existing: OnExisting::default(),
            tick_secs: default_tick_secs(),
        }
    }
}

impl QueueOptions {
    pub fn migration_config(&self, site_id: ArticleId, language: impl Into<String>) -> MigrationConfig {
        MigrationConfig {
            batch_size: self.batch_size,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                backoff: self.backoff,
            },
            ..MigrationConfig::new(site_id, language)
        }
    }

    pub fn settings(&self) -> QueueSettings {
        QueueSettings {
            pause_on_error: self.pause_on_error,
            on_existing: self.on_existing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub article: GenericArticle,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub result: Option<UploadResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// Earliest time of the next attempt after a failure.
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl QueueItem {
    pub fn new(article: GenericArticle, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("item_{}_{}", article.id, now.timestamp_millis()),
            article,
            status: ItemStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            added_at: now,
            processed_at: None,
            next_attempt_at: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Run once, as soon as the scheduler sees the queue.
    Immediate,
    /// Run once at or after `time`.
    Scheduled,
    Recurring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(rename = "type")]
    pub kind: ScheduleKind,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interval: Option<Interval>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn immediate() -> Self {
        Self::new(ScheduleKind::Immediate)
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            time: Some(time),
            ..Self::new(ScheduleKind::Scheduled)
        }
    }

    pub fn every(interval: Interval) -> Self {
        Self {
            interval: Some(interval),
            ..Self::new(ScheduleKind::Recurring)
        }
    }

    fn new(kind: ScheduleKind) -> Self {
        Self {
            kind,
            time: None,
            interval: None,
            last_run: None,
            next_run: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub total_items: usize,
    /// Items in a terminal state.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_time_remaining_ms: Option<u64>,
}

impl QueueStatistics {
    /// Recount from item states.
    pub fn refresh(&mut self, items: &[QueueItem]) {
        let count = |status| items.iter().filter(|item| item.status == status).count();
        self.total_items = items.len();
        self.succeeded = count(ItemStatus::Completed);
        self.failed = count(ItemStatus::Failed);
        self.skipped = count(ItemStatus::Skipped);
        self.processed = self.succeeded + self.failed + self.skipped;
    }

    pub fn percentage(&self) -> f64 {
        if self.total_items == 0 {
            return 100.0;
        }
        self.processed as f64 / self.total_items as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportQueue {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub items: Vec<QueueItem>,
    pub config: MigrationConfig,
    #[serde(default)]
    pub settings: QueueSettings,
    #[serde(default)]
    pub status: QueueStatus,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub statistics: QueueStatistics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportQueue {
    pub fn new_id() -> String {
        format!("queue_{}", uuid::Uuid::new_v4())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = Backoff {
            initial_ms: 100,
            factor: 3.0,
            max_ms: 1000,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(300));
        assert_eq!(backoff.delay(3), Duration::from_millis(900));
        assert_eq!(backoff.delay(4), Duration::from_millis(1000));
    }

    #[test]
    fn options_feed_new_queues() {
        let options: QueueOptions =
            serde_yaml::from_str("batch_size: 4\non_existing: skip\nbackoff: { initial_ms: 5 }")
                .unwrap();
        let config = options.migration_config(ArticleId::Int(2), "ja");
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.collection_name, "posts");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff.initial_ms, 5);
        assert_eq!(config.retry.backoff.max_ms, 60_000);
        assert_eq!(options.settings().on_existing, OnExisting::Skip);
        assert_eq!(options.tick_secs, 60);
    }

    #[test]
    fn schedule_shape() {
        let schedule: Schedule =
            serde_json::from_str(r#"{"type": "recurring", "interval": "monthly"}"#).unwrap();
        assert_eq!(schedule, Schedule::every(Interval::Monthly));
    }
}
