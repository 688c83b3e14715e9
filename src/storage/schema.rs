//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS job_runs (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            started_on TEXT NOT NULL,
            duration_ms INTEGER,
            state TEXT NOT NULL DEFAULT 'not started'
        );

        CREATE TABLE IF NOT EXISTS action_runs (
            id INTEGER PRIMARY KEY,
            job_run_id INTEGER NOT NULL REFERENCES job_runs(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            started_on TEXT NOT NULL,
            duration_ms INTEGER,
            state TEXT NOT NULL DEFAULT 'not started',
            output TEXT
        );

        CREATE TABLE IF NOT EXISTS test_results (
            id INTEGER PRIMARY KEY,
            action_run_id INTEGER NOT NULL REFERENCES action_runs(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            state TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            output TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_job_runs_name ON job_runs(name, started_on);
        CREATE INDEX IF NOT EXISTS idx_action_runs_job ON action_runs(job_run_id);
        CREATE INDEX IF NOT EXISTS idx_test_results_action ON test_results(action_run_id);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
