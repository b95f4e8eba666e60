//! Terminal display of queue runs.
//!
//! Both reporters are [`QueueListener`]s; the queue engine itself never
//! prints.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::{
    cms::upload::UploadResult,
    queue::{ImportQueue, QueueItem, QueueListener},
};

/// Statistics collected during a run.
#[derive(Debug, Default)]
struct Stats {
    succeeded: usize,
    skipped: usize,
    retries: usize,
    warnings: usize,
    start_time: Option<Instant>,
}

impl Stats {
    fn started() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    fn record(&mut self, result: &UploadResult, item: &QueueItem) {
        if result.skipped {
            self.skipped += 1;
        } else {
            self.succeeded += 1;
        }
        self.warnings += item.warnings.len();
    }
}

fn print_summary(stats: &Stats, queue: &ImportQueue) {
    let duration = stats.start_time.map(|t| t.elapsed()).unwrap_or_default();
    eprintln!();
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("📊 {} ({:?})", queue.name, queue.status);
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("   📄 Items:      {} total", queue.statistics.total_items);
    eprintln!(
        "   ✅ Succeeded:  {} ({} this run)",
        queue.statistics.succeeded, stats.succeeded
    );
    if queue.statistics.skipped > 0 {
        eprintln!(
            "   ⏭️  Skipped:    {} ({} this run)",
            queue.statistics.skipped, stats.skipped
        );
    }
    if queue.statistics.failed > 0 {
        eprintln!("   ❌ Failed:     {}", queue.statistics.failed);
    }
    if stats.retries > 0 {
        eprintln!("   🔁 Retries:    {}", stats.retries);
    }
    if stats.warnings > 0 {
        eprintln!("   ⚠️  Warnings:   {}", stats.warnings);
    }
    eprintln!("   ⏱️  Duration:   {:.2}s", duration.as_secs_f64());
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Line-oriented reporter for non-TTY output.
pub struct SimpleReporter {
    stats: RwLock<Stats>,
}

impl SimpleReporter {
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(Stats::started()),
        }
    }
}

impl Default for SimpleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueListener for SimpleReporter {
    fn queue_start(&self, queue: &ImportQueue) {
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = Stats::started();
        eprintln!("📦 {}: {} items", queue.name, queue.items.len());
    }

    fn item_complete(&self, _queue: &ImportQueue, item: &QueueItem, result: &UploadResult) {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record(result, item);
        let mark = if result.skipped { "⏭" } else { "✓" };
        eprintln!("   {mark} {}", item.article.title);
    }

    fn item_retry(&self, _queue: &ImportQueue, item: &QueueItem, attempt: u32) {
        self.stats.write().unwrap_or_else(PoisonError::into_inner).retries += 1;
        eprintln!("   ↻ {} (attempt {attempt})", item.article.title);
    }

    fn item_error(&self, _queue: &ImportQueue, item: &QueueItem, error: &str) {
        eprintln!("   ✗ {}: {error}", item.article.title);
    }

    fn queue_pause(&self, queue: &ImportQueue) {
        eprintln!("⏸️  {} paused", queue.name);
    }

    fn queue_resume(&self, queue: &ImportQueue) {
        eprintln!("▶️  {} resumed", queue.name);
    }

    fn progress(&self, _queue: &ImportQueue, current: usize, total: usize, percentage: f64) {
        eprintln!("   {current}/{total} ({percentage:.0}%)");
    }

    fn queue_complete(&self, queue: &ImportQueue) {
        print_summary(&self.stats.read().unwrap_or_else(PoisonError::into_inner), queue);
    }

    fn queue_error(&self, queue: &ImportQueue, error: &str) {
        eprintln!("❌ {} failed: {error}", queue.name);
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Progress bars for interactive terminals.
pub struct FancyReporter {
    multi: MultiProgress,
    main: RwLock<Option<ProgressBar>>,
    items: RwLock<HashMap<String, ProgressBar>>,
    stats: RwLock<Stats>,
}

impl FancyReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            main: RwLock::new(None),
            items: RwLock::new(HashMap::new()),
            stats: RwLock::new(Stats::started()),
        }
    }

    fn finish_item(&self, item: &QueueItem) {
        if let Some(bar) = self
            .items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&item.id)
        {
            bar.finish_and_clear();
        }
    }

    fn clear(&self) {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        for (_, bar) in items.drain() {
            bar.finish_and_clear();
        }
        if let Some(main) = self.main.write().unwrap_or_else(PoisonError::into_inner).take() {
            main.finish_and_clear();
        }
    }
}

impl Default for FancyReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueListener for FancyReporter {
    fn queue_start(&self, queue: &ImportQueue) {
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = Stats::started();
        let main = self
            .multi
            .add(ProgressBar::new(queue.statistics.total_items as u64));
        main.set_style(
            style("{msg} {bar:40.cyan/blue} {pos}/{len} items ({eta})")
                .progress_chars("█▓▒░  "),
        );
        main.set_message(queue.name.clone());
        main.set_position(queue.statistics.processed as u64);
        *self.main.write().unwrap_or_else(PoisonError::into_inner) = Some(main);
    }

    fn queue_resume(&self, queue: &ImportQueue) {
        self.queue_start(queue);
    }

    fn item_start(&self, _queue: &ImportQueue, item: &QueueItem) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(style("   {spinner:.cyan} {msg}"));
        bar.set_message(format!("⚙️  {}", item.article.title));
        bar.enable_steady_tick(Duration::from_millis(100));
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.id.clone(), bar);
    }

    fn item_complete(&self, _queue: &ImportQueue, item: &QueueItem, result: &UploadResult) {
        self.finish_item(item);
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record(result, item);
    }

    fn item_retry(&self, _queue: &ImportQueue, item: &QueueItem, attempt: u32) {
        self.finish_item(item);
        self.stats.write().unwrap_or_else(PoisonError::into_inner).retries += 1;
        self.multi
            .println(format!("↻  {} (attempt {attempt})", item.article.title))
            .ok();
    }

    fn item_error(&self, _queue: &ImportQueue, item: &QueueItem, error: &str) {
        self.finish_item(item);
        self.multi
            .println(format!("❌ {}: {error}", item.article.title))
            .ok();
    }

    fn progress(&self, _queue: &ImportQueue, current: usize, _total: usize, _percentage: f64) {
        if let Some(main) = &*self.main.read().unwrap_or_else(PoisonError::into_inner) {
            main.set_position(current as u64);
        }
    }

    fn queue_pause(&self, queue: &ImportQueue) {
        self.clear();
        eprintln!("⏸️  {} paused", queue.name);
    }

    fn queue_complete(&self, queue: &ImportQueue) {
        self.clear();
        print_summary(&self.stats.read().unwrap_or_else(PoisonError::into_inner), queue);
    }

    fn queue_error(&self, queue: &ImportQueue, error: &str) {
        self.clear();
        eprintln!("❌ {} failed: {error}", queue.name);
    }
}

/// Create an appropriate reporter based on terminal capabilities.
pub fn create_reporter() -> Arc<dyn QueueListener> {
    if console::Term::stderr().is_term() {
        Arc::new(FancyReporter::new())
    } else {
        Arc::new(SimpleReporter::new())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::source::ArticleId;

    #[test]
    fn simple_reporter_counts() {
        let reporter = SimpleReporter::new();
        let mut item = QueueItem::new(
            serde_json::from_value(json!({"id": 1, "title": "Post"})).unwrap(),
            Utc::now(),
        );
        item.warnings.push("fallback".into());
        let result = UploadResult {
            success: true,
            article_id: ArticleId::Int(1),
            cms_id: None,
            title: "Post".into(),
            error: None,
            skipped: true,
        };
        let queue = serde_json::from_value::<ImportQueue>(json!({
            "id": "queue_x",
            "name": "q",
            "items": [],
            "config": {"site_id": 1, "language": "en"},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
        }))
        .unwrap();
        reporter.item_complete(&queue, &item, &result);
        reporter.item_retry(&queue, &item, 1);
        let stats = reporter.stats.read().unwrap();
        assert_eq!((stats.skipped, stats.succeeded, stats.retries, stats.warnings), (1, 0, 1, 1));
    }
}
