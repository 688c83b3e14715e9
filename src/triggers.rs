//! Triggers bind a job to a scheduling service.

use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

use crate::scheduler::{next_after, parse_cron, SchedulingService};

pub trait Trigger: fmt::Display + Send + Sync {
    /// Ask `scheduler` to run the job named `job` whenever this trigger fires.
    fn register(&self, job: &str, scheduler: &dyn SchedulingService) -> Result<()>;

    /// First fire time strictly after `now`, if the trigger fires at all.
    fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>>;

    fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run_after(Utc::now())
    }
}

/// Fires on a cron schedule.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expr: String,
    schedule: CronSchedule,
}

impl CronTrigger {
    /// Validate `expr` up front so a bad schedule fails at load time.
    pub fn new(expr: impl Into<String>) -> Result<Self, cron::error::Error> {
        let expr = expr.into();
        let schedule = parse_cron(&expr)?;
        Ok(Self { expr, schedule })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }
}

impl fmt::Display for CronTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cron ({})", self.expr)
    }
}

impl Trigger for CronTrigger {
    fn register(&self, job: &str, scheduler: &dyn SchedulingService) -> Result<()> {
        scheduler.schedule(&self.expr, job)
    }

    fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_after(&self.schedule, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::CronScheduler;
    use chrono::TimeZone;

    #[test]
    fn test_next_run_is_repeatable() {
        let trigger = CronTrigger::new("0 4 * * Sun").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(); // a Wednesday
        let expected = Utc.with_ymd_and_hms(2024, 5, 5, 4, 0, 0).unwrap();
        assert_eq!(trigger.next_run_after(now), Some(expected));
        assert_eq!(trigger.next_run_after(now), Some(expected));
    }

    #[test]
    fn test_next_run_independent_of_registration() {
        let trigger = CronTrigger::new("*/10 * * * *").unwrap();
        let before = trigger.next_run().unwrap();
        assert!(before > Utc::now() - chrono::Duration::seconds(1));

        let scheduler = CronScheduler::new();
        trigger.register("job", &scheduler).unwrap();
        assert_eq!(scheduler.preview().len(), 1);
        assert!(trigger.next_run().is_some());
    }

    #[test]
    fn test_invalid_cron_rejected() {
        assert!(CronTrigger::new("whenever").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(CronTrigger::new("0 3 * * *").unwrap().to_string(), "cron (0 3 * * *)");
    }
}
