use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Datelike as _, Months, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::queue::{Error, Interval, QueueManager, Schedule, ScheduleKind, pipeline::ItemProcessor};

fn period(interval: Interval) -> Option<TimeDelta> {
    match interval {
        Interval::Hourly => Some(TimeDelta::hours(1)),
        Interval::Daily => Some(TimeDelta::days(1)),
        Interval::Weekly => Some(TimeDelta::weeks(1)),
        Interval::Monthly => None,
    }
}

/// Whether a queue with `schedule` should start at `now`.
///
/// Monthly recurrence compares the calendar month and year, not elapsed
/// time.
pub fn due(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    match schedule.kind {
        ScheduleKind::Immediate => schedule.last_run.is_none(),
        ScheduleKind::Scheduled => {
            schedule.last_run.is_none() && schedule.time.is_some_and(|time| time <= now)
        }
        ScheduleKind::Recurring => {
            let Some(last_run) = schedule.last_run else {
                return true;
            };
            match schedule.interval {
                Some(Interval::Monthly) => {
                    (now.year(), now.month()) != (last_run.year(), last_run.month())
                }
                Some(interval) => period(interval).is_some_and(|period| now - last_run >= period),
                None => false,
            }
        }
    }
}

/// Earliest time a recurring schedule that ran at `last_run` is due again.
pub fn next_run(schedule: &Schedule, last_run: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if schedule.kind != ScheduleKind::Recurring {
        return None;
    }
    match schedule.interval? {
        Interval::Monthly => last_run
            .date_naive()
            .with_day(1)?
            .checked_add_months(Months::new(1))?
            .and_hms_opt(0, 0, 0)
            .map(|start| start.and_utc()),
        interval => period(interval).map(|period| last_run + period),
    }
}

/// Periodic driver of [`QueueManager::tick`]. A tick that finds the manager
/// busy does nothing.
pub struct Scheduler<P> {
    manager: Arc<Mutex<QueueManager<P>>>,
    period: Duration,
}

impl<P: ItemProcessor> Scheduler<P> {
    pub fn new(manager: Arc<Mutex<QueueManager<P>>>, period: Duration) -> Self {
        Self { manager, period }
    }

    pub fn manager(&self) -> &Arc<Mutex<QueueManager<P>>> {
        &self.manager
    }

    /// One scheduling pass. Returns the id of the queue that ran.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Option<String>, Error> {
        let Ok(mut manager) = self.manager.try_lock() else {
            debug!("queue manager busy, skipping tick");
            return Ok(None);
        };
        manager.tick(now).await
    }

    /// Tick forever. Errors of a single pass are logged.
    pub async fn run(&self) {
        info!(period = ?self.period, "scheduler started");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.tick(Utc::now()).await {
                Ok(Some(id)) => info!(queue_id = id, "scheduled run finished"),
                Ok(None) => {}
                Err(error) => error!(%error, "scheduled run failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;
    use crate::queue::QueueStore;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn one_shot_schedules_run_once() {
        let now = at(2024, 5, 10, 12);
        let mut immediate = Schedule::immediate();
        assert!(due(&immediate, now));
        immediate.last_run = Some(now);
        assert!(!due(&immediate, now));

        let mut scheduled = Schedule::at(at(2024, 5, 10, 13));
        assert!(!due(&scheduled, now));
        assert!(due(&scheduled, at(2024, 5, 10, 13)));
        scheduled.last_run = Some(at(2024, 5, 10, 13));
        assert!(!due(&scheduled, at(2024, 6, 1, 0)));

        let untimed = Schedule {
            kind: ScheduleKind::Scheduled,
            ..Schedule::immediate()
        };
        assert!(!due(&untimed, now));
    }

    #[test]
    fn recurring_intervals() {
        let mut hourly = Schedule::every(Interval::Hourly);
        assert!(due(&hourly, at(2024, 5, 10, 12)));
        hourly.last_run = Some(at(2024, 5, 10, 12));
        assert!(!due(&hourly, at(2024, 5, 10, 12) + TimeDelta::minutes(59)));
        assert!(due(&hourly, at(2024, 5, 10, 13)));

        let mut weekly = Schedule::every(Interval::Weekly);
        weekly.last_run = Some(at(2024, 5, 1, 0));
        assert!(!due(&weekly, at(2024, 5, 7, 23)));
        assert!(due(&weekly, at(2024, 5, 8, 0)));

        let mut monthly = Schedule::every(Interval::Monthly);
        monthly.last_run = Some(at(2024, 1, 31, 23));
        assert!(due(&monthly, at(2024, 2, 1, 0)));
        monthly.last_run = Some(at(2024, 2, 1, 0));
        assert!(!due(&monthly, at(2024, 2, 29, 23)));
        monthly.last_run = Some(at(2023, 3, 1, 0));
        assert!(due(&monthly, at(2024, 3, 1, 0)));
        assert_eq!(
            next_run(&monthly, at(2024, 1, 31, 23)),
            Some(at(2024, 2, 1, 0))
        );

        let no_interval = Schedule {
            interval: None,
            last_run: Some(at(2024, 1, 1, 0)),
            ..Schedule::every(Interval::Daily)
        };
        assert!(!due(&no_interval, at(2025, 1, 1, 0)));
    }

    struct Never;

    impl ItemProcessor for Never {
        async fn process(
            &self,
            _item: &crate::queue::QueueItem,
            _config: &crate::queue::MigrationConfig,
            _settings: &crate::queue::QueueSettings,
        ) -> Result<crate::cms::upload::UploadResult, crate::queue::pipeline::Error> {
            Err(crate::queue::pipeline::Error::Rejected("unused".into()))
        }
    }

    #[tokio::test]
    async fn busy_manager_makes_tick_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let manager = QueueManager::new(QueueStore::new(dir.path()), Never);
        let scheduler = Scheduler::new(Arc::new(Mutex::new(manager)), Duration::from_secs(60));
        let guard = scheduler.manager().lock().await;
        assert!(scheduler.tick(Utc::now()).await.unwrap().is_none());
        drop(guard);
        assert!(scheduler.tick(Utc::now()).await.unwrap().is_none());
    }
}
