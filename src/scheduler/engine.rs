use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use tracing::{debug, error, info};

use super::{next_after, parse_cron, SchedulingService};
use crate::registry::JobRegistry;

struct Entry {
    job: String,
    expr: String,
    schedule: CronSchedule,
    next: Option<DateTime<Utc>>,
}

/// In-process scheduling service polled by [`run_scheduler_loop`].
#[derive(Default)]
pub struct CronScheduler {
    entries: Mutex<Vec<Entry>>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Schedule relative to an explicit clock.
    pub fn schedule_at(&self, expr: &str, job: &str, now: DateTime<Utc>) -> Result<()> {
        let schedule = parse_cron(expr)
            .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expr, e))?;
        let next = next_after(&schedule, now);
        self.entries().push(Entry {
            job: job.to_string(),
            expr: expr.to_string(),
            schedule,
            next,
        });
        Ok(())
    }

    /// Jobs whose fire time has passed at `now`, advancing each past `now`.
    ///
    /// An entry that missed several fire times is returned once.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due = Vec::new();
        for entry in self.entries().iter_mut() {
            if matches!(entry.next, Some(at) if at <= now) {
                due.push(entry.job.clone());
                entry.next = next_after(&entry.schedule, now);
            }
        }
        due
    }

    /// `(job, expression, next fire time)` for every entry.
    pub fn preview(&self) -> Vec<(String, String, Option<DateTime<Utc>>)> {
        let mut list: Vec<_> = self
            .entries()
            .iter()
            .map(|e| (e.job.clone(), e.expr.clone(), e.next))
            .collect();
        list.sort_by(|a, b| a.2.cmp(&b.2));
        list
    }
}

impl SchedulingService for CronScheduler {
    fn schedule(&self, expr: &str, job: &str) -> Result<()> {
        self.schedule_at(expr, job, Utc::now())
    }
}

/// Main scheduler execution loop.
/// Polls for due entries every `tick` and runs each due job in its own task.
pub async fn run_scheduler_loop(scheduler: Arc<CronScheduler>, registry: Arc<JobRegistry>, tick: Duration) {
    info!(tick_secs = tick.as_secs(), "Scheduler engine started");

    let mut interval = tokio::time::interval(tick);

    loop {
        interval.tick().await;

        let due = scheduler.take_due(Utc::now());
        if due.is_empty() {
            debug!("No jobs due");
            continue;
        }

        for name in due {
            info!(job = %name, "Job due");
            let registry = registry.clone();
            tokio::spawn(async move {
                if let Err(e) = registry.run(&name).await {
                    error!(job = %name, "Scheduled run failed: {:#}", e);
                }
            });
        }
    }
}
