//! cdrun -- a small continuous-delivery job runner.
//!
//! Jobs are ordered pipelines of actions (shell commands, git checkouts,
//! Python virtualenvs and test runs, MSBuild) declared in YAML files. Every
//! run is recorded in SQLite, cron triggers start jobs unattended, and
//! email notifications report the outcome.

pub mod actions;
pub mod config;
pub mod env;
pub mod job;
pub mod jobfile;
pub mod notifications;
pub mod process;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod triggers;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::CdrunConfig;
use crate::job::Services;
use crate::notifications::{LogTransport, MailTransport, SendmailTransport};
use crate::registry::JobRegistry;
use crate::scheduler::CronScheduler;
use crate::storage::SqliteRunStore;

/// Open the run store and pick the mail transport described by `config`.
pub fn services(config: &CdrunConfig) -> Result<Services> {
    let db_path = config.storage.database.to_string_lossy();
    tracing::info!(%db_path, "Initializing database");
    let store = SqliteRunStore::open(&db_path)
        .with_context(|| format!("failed to open run store {}", db_path))?;

    let mailer: Arc<dyn MailTransport> = if config.mail.enabled {
        Arc::new(SendmailTransport::new(&config.mail.sendmail, &config.mail.from))
    } else {
        Arc::new(LogTransport)
    };

    Ok(Services::new(Arc::new(store), mailer))
}

/// Start the cdrun daemon: load jobs, register their triggers and run the
/// scheduler until Ctrl-C.
pub async fn serve(config: &CdrunConfig) -> Result<()> {
    // 1. Initialize Storage and mail
    let services = services(config)?;

    // 2. Load jobs
    let mut registry = JobRegistry::new(services);
    let loaded = registry.load_files(&config.jobs.files, &config.jobs.workdir);
    if loaded == 0 {
        tracing::warn!("No jobs loaded");
    }

    // 3. Register triggers
    let scheduler = Arc::new(CronScheduler::new());
    registry.register_all(scheduler.as_ref())?;
    for (job, expr, next) in scheduler.preview() {
        match next {
            Some(at) => tracing::info!(%job, %expr, next = %at.to_rfc3339(), "Scheduled"),
            None => tracing::warn!(%job, %expr, "Schedule never fires"),
        }
    }

    // 4. Start Scheduler Engine until interrupted
    let registry = Arc::new(registry);
    let engine = tokio::spawn(scheduler::run_scheduler_loop(
        scheduler,
        registry,
        config.scheduler.tick(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    engine.abort();

    Ok(())
}
