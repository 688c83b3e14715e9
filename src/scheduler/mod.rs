//! Scheduling port and the cron-driven polling engine behind it.

pub mod engine;

use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

pub use self::engine::{run_scheduler_loop, CronScheduler};

/// Parse a cron expression.
///
/// Classic 5-field crontab lines (`m h dom mon dow`) are accepted with
/// crontab day-of-week numbering (0 and 7 are Sunday) and a zero seconds
/// field. 6 and 7 field expressions are passed to the `cron` crate
/// unchanged, where 1 is Sunday.
pub fn parse_cron(expr: &str) -> Result<CronSchedule, cron::error::Error> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, dom, month, dow] => CronSchedule::from_str(&format!(
            "0 {} {} {} {} {}",
            minute,
            hour,
            dom,
            month,
            crontab_day_of_week(dow)
        )),
        _ => CronSchedule::from_str(expr.trim()),
    }
}

/// Renumber a crontab day-of-week field for the `cron` crate.
///
/// Numeric items (`n`, `a-b`, `a-b/s`, `a/s`) are expanded to explicit
/// days; names and `*` pass through. Items that do not parse are left for
/// the `cron` crate to reject.
fn crontab_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|item| crontab_days(item).unwrap_or_else(|| item.to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

fn crontab_days(item: &str) -> Option<String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (item, 1),
    };
    let (start, end) = match range.split_once('-') {
        Some((a, b)) => (a.parse::<u32>().ok()?, b.parse::<u32>().ok()?),
        None => {
            let a = range.parse::<u32>().ok()?;
            (a, if item.contains('/') { 7 } else { a })
        }
    };
    if start > end || end > 7 {
        return None;
    }

    let mut days: Vec<u32> = (start..=end).step_by(step).map(|d| d % 7 + 1).collect();
    days.sort_unstable();
    days.dedup();
    Some(days.iter().map(u32::to_string).collect::<Vec<_>>().join(","))
}

/// First fire time of `schedule` strictly after `now`.
pub fn next_after(schedule: &CronSchedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&now).next()
}

/// What the core needs from a scheduling service.
///
/// Jobs are referenced by name only; when an entry fires, the service asks
/// the job registry to run that job.
pub trait SchedulingService: Send + Sync {
    /// Fire `job` whenever `expr` matches.
    fn schedule(&self, expr: &str, job: &str) -> Result<()>;

    /// First time `expr` fires strictly after `now`.
    fn next_fire_time(&self, expr: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let schedule = parse_cron(expr)
            .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expr, e))?;
        Ok(next_after(&schedule, now))
    }
}
