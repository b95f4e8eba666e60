//! Queue lifecycle notifications.
//!
//! Ordering within one run: `queue_start`, then per batch every
//! `item_start` of the batch, then `item_complete` / `item_retry` /
//! `item_error` in item order once the whole batch settled, then
//! `progress`. `queue_pause`, `queue_complete` or `queue_error` close the
//! run.

use serde::Serialize;

use crate::{
    cms::upload::UploadResult,
    queue::{ImportQueue, QueueItem, QueueStatistics},
};

/// Receives queue events. Every method defaults to doing nothing.
pub trait QueueListener: Send + Sync {
    fn item_start(&self, _queue: &ImportQueue, _item: &QueueItem) {}
    fn item_complete(&self, _queue: &ImportQueue, _item: &QueueItem, _result: &UploadResult) {}
    fn item_error(&self, _queue: &ImportQueue, _item: &QueueItem, _error: &str) {}
    fn item_retry(&self, _queue: &ImportQueue, _item: &QueueItem, _attempt: u32) {}
    fn queue_start(&self, _queue: &ImportQueue) {}
    fn queue_pause(&self, _queue: &ImportQueue) {}
    fn queue_resume(&self, _queue: &ImportQueue) {}
    fn queue_complete(&self, _queue: &ImportQueue) {}
    fn queue_error(&self, _queue: &ImportQueue, _error: &str) {}
    fn progress(&self, _queue: &ImportQueue, _current: usize, _total: usize, _percentage: f64) {}
}

pub struct NullListener;

impl QueueListener for NullListener {}

/// Owned snapshot of one notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    ItemStart {
        queue_id: String,
        item_id: String,
        title: String,
    },
    ItemComplete {
        queue_id: String,
        item_id: String,
        result: UploadResult,
    },
    ItemError {
        queue_id: String,
        item_id: String,
        error: String,
    },
    ItemRetry {
        queue_id: String,
        item_id: String,
        attempt: u32,
    },
    QueueStart {
        queue_id: String,
    },
    QueuePause {
        queue_id: String,
    },
    QueueResume {
        queue_id: String,
    },
    QueueComplete {
        queue_id: String,
        statistics: QueueStatistics,
    },
    QueueError {
        queue_id: String,
        error: String,
    },
    Progress {
        queue_id: String,
        current: usize,
        total: usize,
        percentage: f64,
    },
}

/// Forwards events into an unbounded channel. Events sent after every
/// receiver is gone are dropped.
#[derive(Clone)]
pub struct ChannelListener {
    sender: async_channel::Sender<QueueEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, async_channel::Receiver<QueueEvent>) {
        let (sender, receiver) = async_channel::unbounded();
        (Self { sender }, receiver)
    }

    fn send(&self, event: QueueEvent) {
        let _ = self.sender.try_send(event);
    }
}

impl QueueListener for ChannelListener {
    fn item_start(&self, queue: &ImportQueue, item: &QueueItem) {
        self.send(QueueEvent::ItemStart {
            queue_id: queue.id.clone(),
            item_id: item.id.clone(),
            title: item.article.title.clone(),
        });
    }

    fn item_complete(&self, queue: &ImportQueue, item: &QueueItem, result: &UploadResult) {
        self.send(QueueEvent::ItemComplete {
            queue_id: queue.id.clone(),
            item_id: item.id.clone(),
            result: result.clone(),
        });
    }

    fn item_error(&self, queue: &ImportQueue, item: &QueueItem, error: &str) {
        self.send(QueueEvent::ItemError {
            queue_id: queue.id.clone(),
            item_id: item.id.clone(),
            error: error.to_string(),
        });
    }

    fn item_retry(&self, queue: &ImportQueue, item: &QueueItem, attempt: u32) {
        self.send(QueueEvent::ItemRetry {
            queue_id: queue.id.clone(),
            item_id: item.id.clone(),
            attempt,
        });
    }

    fn queue_start(&self, queue: &ImportQueue) {
        self.send(QueueEvent::QueueStart {
            queue_id: queue.id.clone(),
        });
    }

    fn queue_pause(&self, queue: &ImportQueue) {
        self.send(QueueEvent::QueuePause {
            queue_id: queue.id.clone(),
        });
    }

    fn queue_resume(&self, queue: &ImportQueue) {
        self.send(QueueEvent::QueueResume {
            queue_id: queue.id.clone(),
        });
    }

    fn queue_complete(&self, queue: &ImportQueue) {
        self.send(QueueEvent::QueueComplete {
            queue_id: queue.id.clone(),
            statistics: queue.statistics.clone(),
        });
    }

    fn queue_error(&self, queue: &ImportQueue, error: &str) {
        self.send(QueueEvent::QueueError {
            queue_id: queue.id.clone(),
            error: error.to_string(),
        });
    }

    fn progress(&self, queue: &ImportQueue, current: usize, total: usize, percentage: f64) {
        self.send(QueueEvent::Progress {
            queue_id: queue.id.clone(),
            current,
            total,
            percentage,
        });
    }
}
