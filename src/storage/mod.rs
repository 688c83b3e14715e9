//! Run history: the `RunStore` port and its SQLite implementation.

pub mod schema;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::state::RunState;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobRunId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ActionRunId(pub i64);

/// One execution of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub id: JobRunId,
    pub name: String,
    pub started_on: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub state: RunState,
}

/// One execution of one action within a job run.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRun {
    pub id: ActionRunId,
    pub job_run: JobRunId,
    pub name: String,
    pub started_on: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub state: RunState,
    pub output: Option<String>,
}

/// One test case parsed from a structured test report.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub action_run: ActionRunId,
    pub name: String,
    pub state: RunState,
    pub duration: Duration,
    pub output: Option<String>,
}

/// An action run together with the test results it produced.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRunReport {
    pub run: ActionRun,
    pub tests: Vec<TestResult>,
}

/// A job run with everything recorded underneath it, in pipeline order.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunReport {
    pub job_run: JobRun,
    pub actions: Vec<ActionRunReport>,
}

/// Durable record of job runs, action runs and test results.
///
/// Runs are created in the Running state and finalized exactly once.
pub trait RunStore: Send + Sync {
    fn create_job_run(&self, name: &str) -> Result<JobRunId>;

    fn finalize_job_run(&self, id: JobRunId, state: RunState, duration: Duration) -> Result<()>;

    fn create_action_run(&self, name: &str, job_run: JobRunId) -> Result<ActionRunId>;

    fn finalize_action_run(
        &self,
        id: ActionRunId,
        state: RunState,
        output: &str,
        duration: Duration,
    ) -> Result<()>;

    fn create_test_result(&self, result: &TestResult) -> Result<()>;

    /// Load a job run with its action runs and test results.
    fn job_run_report(&self, id: JobRunId) -> Result<JobRunReport>;

    /// Most recent job runs first, optionally restricted to one job name.
    fn recent_job_runs(&self, name: Option<&str>, limit: usize) -> Result<Vec<JobRun>>;
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// `RunStore` backed by a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteRunStore {
    pool: Pool,
}

impl SqliteRunStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        Ok(Self::new(open_pool(path)?))
    }

    fn action_runs(&self, job_run: JobRunId) -> Result<Vec<ActionRun>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_run_id, name, started_on, duration_ms, state, output
             FROM action_runs WHERE job_run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![job_run.0], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut runs = Vec::new();
        for r in rows {
            let (id, job_run_id, name, started_on, duration_ms, state, output) = r?;
            runs.push(ActionRun {
                id: ActionRunId(id),
                job_run: JobRunId(job_run_id),
                name,
                started_on: parse_timestamp(&started_on)?,
                duration: duration_ms.map(from_millis),
                state: state.parse()?,
                output,
            });
        }
        Ok(runs)
    }

    fn test_results(&self, action_run: ActionRunId) -> Result<Vec<TestResult>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT name, state, duration_ms, output
             FROM test_results WHERE action_run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![action_run.0], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut results = Vec::new();
        for r in rows {
            let (name, state, duration_ms, output) = r?;
            results.push(TestResult {
                action_run,
                name,
                state: state.parse()?,
                duration: from_millis(duration_ms),
                output,
            });
        }
        Ok(results)
    }
}

impl RunStore for SqliteRunStore {
    fn create_job_run(&self, name: &str) -> Result<JobRunId> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO job_runs (name, started_on, state) VALUES (?1, ?2, ?3)",
            params![name, timestamp_now(), RunState::Running.as_str()],
        )
        .context("Failed to insert job run")?;
        Ok(JobRunId(conn.last_insert_rowid()))
    }

    fn finalize_job_run(&self, id: JobRunId, state: RunState, duration: Duration) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE job_runs SET state = ?1, duration_ms = ?2 WHERE id = ?3 AND state = ?4",
            params![state.as_str(), to_millis(duration), id.0, RunState::Running.as_str()],
        )?;
        if changed == 0 {
            anyhow::bail!("Job run {} not found or already finalized", id.0);
        }
        Ok(())
    }

    fn create_action_run(&self, name: &str, job_run: JobRunId) -> Result<ActionRunId> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO action_runs (job_run_id, name, started_on, state) VALUES (?1, ?2, ?3, ?4)",
            params![job_run.0, name, timestamp_now(), RunState::Running.as_str()],
        )
        .context("Failed to insert action run")?;
        Ok(ActionRunId(conn.last_insert_rowid()))
    }

    fn finalize_action_run(
        &self,
        id: ActionRunId,
        state: RunState,
        output: &str,
        duration: Duration,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE action_runs SET state = ?1, output = ?2, duration_ms = ?3
             WHERE id = ?4 AND state = ?5",
            params![
                state.as_str(),
                output,
                to_millis(duration),
                id.0,
                RunState::Running.as_str()
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("Action run {} not found or already finalized", id.0);
        }
        Ok(())
    }

    fn create_test_result(&self, result: &TestResult) -> Result<()> {
        if matches!(result.state, RunState::Running | RunState::NotStarted) {
            anyhow::bail!(
                "Test result '{}' cannot be recorded as '{}'",
                result.name,
                result.state
            );
        }
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO test_results (action_run_id, name, state, duration_ms, output)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.action_run.0,
                result.name,
                result.state.as_str(),
                to_millis(result.duration),
                result.output
            ],
        )
        .context("Failed to insert test result")?;
        Ok(())
    }

    fn job_run_report(&self, id: JobRunId) -> Result<JobRunReport> {
        let job_run = {
            let conn = self.pool.get()?;
            conn.query_row(
                "SELECT id, name, started_on, duration_ms, state FROM job_runs WHERE id = ?1",
                params![id.0],
                job_run_columns,
            )
            .optional()?
            .ok_or_else(|| anyhow::anyhow!("Job run {} not found", id.0))?
        };
        let job_run = job_run.into_job_run()?;

        let mut actions = Vec::new();
        for run in self.action_runs(id)? {
            let tests = self.test_results(run.id)?;
            actions.push(ActionRunReport { run, tests });
        }

        Ok(JobRunReport { job_run, actions })
    }

    fn recent_job_runs(&self, name: Option<&str>, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, started_on, duration_ms, state FROM job_runs
             WHERE ?1 IS NULL OR name = ?1
             ORDER BY started_on DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![name, limit as i64], job_run_columns)?;

        let mut runs = Vec::new();
        for r in rows {
            runs.push(r?.into_job_run()?);
        }
        Ok(runs)
    }
}

struct JobRunRow {
    id: i64,
    name: String,
    started_on: String,
    duration_ms: Option<i64>,
    state: String,
}

impl JobRunRow {
    fn into_job_run(self) -> Result<JobRun> {
        Ok(JobRun {
            id: JobRunId(self.id),
            name: self.name,
            started_on: parse_timestamp(&self.started_on)?,
            duration: self.duration_ms.map(from_millis),
            state: self.state.parse()?,
        })
    }
}

fn job_run_columns(row: &Row<'_>) -> rusqlite::Result<JobRunRow> {
    Ok(JobRunRow {
        id: row.get(0)?,
        name: row.get(1)?,
        started_on: row.get(2)?,
        duration_ms: row.get(3)?,
        state: row.get(4)?,
    })
}

fn timestamp_now() -> String {
    // Fixed width so lexical order in SQL matches time order.
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp '{}'", s))?
        .with_timezone(&Utc))
}

fn to_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn from_millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}
