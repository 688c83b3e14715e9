//! HTML job run report rendered with askama.

use std::time::Duration;

use anyhow::Result;
use askama::Template;

use crate::state::RunState;
use crate::storage::JobRunReport;

#[derive(Template)]
#[template(path = "jobrun_report.html")]
struct JobRunReportTemplate<'a> {
    name: &'a str,
    state: &'static str,
    color: &'static str,
    started_on: String,
    duration: String,
    actions: Vec<ActionView<'a>>,
}

struct ActionView<'a> {
    name: &'a str,
    state: &'static str,
    color: &'static str,
    duration: String,
    output: &'a str,
    tests: Vec<TestView<'a>>,
    tests_passed: usize,
}

struct TestView<'a> {
    name: &'a str,
    state: &'static str,
    color: &'static str,
    duration: String,
    output: &'a str,
}

/// Badge color for a state.
fn color(state: RunState) -> &'static str {
    match state {
        RunState::Success => "#198754",
        RunState::Error => "#6f42c1",
        RunState::Failed => "#dc3545",
        RunState::Skipped => "#ffc107",
        RunState::Running | RunState::NotStarted => "#6c757d",
    }
}

/// `850ms`, `12.4s`, `3m 07s`, `1h 02m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else if secs >= 1 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}ms", d.as_millis())
    }
}

fn format_optional(d: Option<Duration>) -> String {
    d.map(format_duration).unwrap_or_else(|| "-".to_string())
}

/// `Job report - <name> - <state>`
pub fn subject(report: &JobRunReport) -> String {
    format!("Job report - {} - {}", report.job_run.name, report.job_run.state)
}

pub fn render_html(report: &JobRunReport) -> Result<String> {
    let actions = report
        .actions
        .iter()
        .map(|a| ActionView {
            name: &a.run.name,
            state: a.run.state.as_str(),
            color: color(a.run.state),
            duration: format_optional(a.run.duration),
            output: a.run.output.as_deref().unwrap_or(""),
            tests_passed: a.tests.iter().filter(|t| t.state == RunState::Success).count(),
            tests: a
                .tests
                .iter()
                .map(|t| TestView {
                    name: &t.name,
                    state: t.state.as_str(),
                    color: color(t.state),
                    duration: format_duration(t.duration),
                    output: t.output.as_deref().unwrap_or(""),
                })
                .collect(),
        })
        .collect();

    let template = JobRunReportTemplate {
        name: &report.job_run.name,
        state: report.job_run.state.as_str(),
        color: color(report.job_run.state),
        started_on: report.job_run.started_on.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        duration: format_optional(report.job_run.duration),
        actions,
    };
    Ok(template.render()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ActionRun, ActionRunId, ActionRunReport, JobRun, JobRunId, TestResult};
    use chrono::Utc;

    fn report() -> JobRunReport {
        JobRunReport {
            job_run: JobRun {
                id: JobRunId(1),
                name: "nightly".into(),
                started_on: Utc::now(),
                duration: Some(Duration::from_secs(75)),
                state: RunState::Failed,
            },
            actions: vec![ActionRunReport {
                run: ActionRun {
                    id: ActionRunId(1),
                    job_run: JobRunId(1),
                    name: "pytest".into(),
                    started_on: Utc::now(),
                    duration: Some(Duration::from_millis(900)),
                    state: RunState::Failed,
                    output: Some("> python -m pytest\n<boom>".into()),
                },
                tests: vec![TestResult {
                    action_run: ActionRunId(1),
                    name: "tests.test_a.test_x".into(),
                    state: RunState::Failed,
                    duration: Duration::from_millis(12),
                    output: Some("assert 1 == 2".into()),
                }],
            }],
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(12_400)), "12.4s");
        assert_eq!(format_duration(Duration::from_secs(187)), "3m 07s");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1h 02m");
    }

    #[test]
    fn test_subject() {
        assert_eq!(subject(&report()), "Job report - nightly - failed");
    }

    #[test]
    fn test_render_contains_runs_and_escapes_output() {
        let html = render_html(&report()).unwrap();
        assert!(html.contains("nightly"));
        assert!(html.contains("pytest"));
        assert!(html.contains("tests.test_a.test_x"));
        assert!(html.contains("assert 1 == 2"));
        assert!(html.contains("&lt;boom&gt;"));
        assert!(!html.contains("<boom>"));
    }
}
