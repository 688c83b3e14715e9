//! Jobs: an ordered pipeline of actions plus its triggers and notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::actions::{self, Action};
use crate::env::Environment;
use crate::notifications::{MailTransport, Notification};
use crate::scheduler::SchedulingService;
use crate::state::RunState;
use crate::storage::{JobRunId, RunStore};
use crate::triggers::Trigger;

/// Collaborators a job run reports to.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn RunStore>,
    pub mailer: Arc<dyn MailTransport>,
}

impl Services {
    pub fn new(store: Arc<dyn RunStore>, mailer: Arc<dyn MailTransport>) -> Self {
        Self { store, mailer }
    }
}

/// Immutable job configuration, reused across runs.
pub struct Job {
    name: String,
    workdir: PathBuf,
    actions: Vec<Box<dyn Action>>,
    triggers: Vec<Box<dyn Trigger>>,
    notifications: Vec<Box<dyn Notification>>,
}

impl Job {
    pub fn new(name: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            workdir: workdir.into(),
            actions: Vec::new(),
            triggers: Vec::new(),
            notifications: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: impl Action + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    pub fn with_trigger(mut self, trigger: impl Trigger + 'static) -> Self {
        self.triggers.push(Box::new(trigger));
        self
    }

    pub fn with_notification(mut self, notification: impl Notification + 'static) -> Self {
        self.notifications.push(Box::new(notification));
        self
    }

    pub fn push_action(&mut self, action: Box<dyn Action>) {
        self.actions.push(action);
    }

    pub fn push_trigger(&mut self, trigger: Box<dyn Trigger>) {
        self.triggers.push(trigger);
    }

    pub fn push_notification(&mut self, notification: Box<dyn Notification>) {
        self.notifications.push(notification);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    pub fn triggers(&self) -> &[Box<dyn Trigger>] {
        &self.triggers
    }

    pub fn notifications(&self) -> &[Box<dyn Notification>] {
        &self.notifications
    }

    /// Earliest next fire time over all triggers; `None` without triggers.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run_after(Utc::now())
    }

    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.triggers.iter().filter_map(|t| t.next_run_after(now)).min()
    }

    /// Register every trigger of this job with `scheduler`.
    pub fn register(&self, scheduler: &dyn SchedulingService) -> Result<()> {
        for trigger in &self.triggers {
            trigger.register(&self.name, scheduler)?;
            info!(job = %self.name, %trigger, "Registered trigger");
        }
        Ok(())
    }

    /// Run the pipeline once and dispatch notifications.
    ///
    /// Actions run in order and the pipeline stops at the first action that
    /// does not succeed. The outcome is only observable through the store
    /// and notifications; the returned id merely locates the record, and is
    /// `None` if the store could not create one.
    pub async fn run(&self, services: &Services) -> Option<JobRunId> {
        info!(job = %self.name, workdir = %self.workdir.display(), "Job started");
        let store = services.store.as_ref();

        let job_run = match store.create_job_run(&self.name) {
            Ok(id) => id,
            Err(e) => {
                error!(job = %self.name, "Failed to create job run: {:#}", e);
                return None;
            }
        };
        let start = Instant::now();

        let total = self.actions.len();
        let mut env = Environment::new();
        let mut states = Vec::with_capacity(total);

        for (i, action) in self.actions.iter().enumerate() {
            info!(job = %self.name, action = %action.name(), "Action ({}/{})", i + 1, total);
            let (state, next_env) =
                actions::run(action.as_ref(), &self.name, job_run, &self.workdir, env, store).await;
            env = next_env;
            states.push(state);
            info!(job = %self.name, action = %action.name(), %state, "Action ({}/{}) finished", i + 1, total);

            if state != RunState::Success {
                break;
            }
        }

        let state = RunState::aggregate(states);
        if let Err(e) = store.finalize_job_run(job_run, state, start.elapsed()) {
            error!(job = %self.name, "Failed to finalize job run: {:#}", e);
        }
        info!(job = %self.name, %state, "Job finished");

        self.notify(job_run, services).await;
        Some(job_run)
    }

    /// Best effort: a failing notification is logged and the rest still run.
    async fn notify(&self, job_run: JobRunId, services: &Services) {
        if self.notifications.is_empty() {
            return;
        }

        let report = match services.store.job_run_report(job_run) {
            Ok(report) => report,
            Err(e) => {
                error!(job = %self.name, "Failed to load job run for notifications: {:#}", e);
                return;
            }
        };

        for notification in &self.notifications {
            if let Err(e) = notification.notify(&report, services).await {
                error!(job = %self.name, %notification, "Notification failed: {:#}", e);
            }
        }
    }
}
