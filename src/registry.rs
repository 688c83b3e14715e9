//! Loaded jobs, keyed by name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::job::{Job, Services};
use crate::jobfile::{self, ConfigError};
use crate::scheduler::SchedulingService;
use crate::storage::JobRunId;

/// Every job the daemon knows about, plus the services its runs report to.
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<Job>>,
    services: Services,
}

impl JobRegistry {
    pub fn new(services: Services) -> Self {
        Self {
            jobs: BTreeMap::new(),
            services,
        }
    }

    pub fn insert(&mut self, job: Job) -> Result<(), ConfigError> {
        if self.jobs.contains_key(job.name()) {
            return Err(ConfigError::DuplicateJob {
                name: job.name().to_string(),
            });
        }
        self.jobs.insert(job.name().to_string(), Arc::new(job));
        Ok(())
    }

    /// Load every job file. Unreadable files and duplicate names are logged
    /// and skipped; returns the number of jobs added.
    pub fn load_files(&mut self, files: &[PathBuf], default_workdir: &Path) -> usize {
        let mut loaded = 0;
        for path in files {
            let job = match jobfile::load_job(path, default_workdir) {
                Ok(job) => job,
                Err(e) => {
                    error!(path = %path.display(), "Skipping job file: {}", e);
                    continue;
                }
            };
            let name = job.name().to_string();
            match self.insert(job) {
                Ok(()) => {
                    info!(job = %name, path = %path.display(), "Job loaded");
                    loaded += 1;
                }
                Err(e) => warn!(path = %path.display(), "Skipping job file: {}", e),
            }
        }
        loaded
    }

    pub fn get(&self, name: &str) -> Option<Arc<Job>> {
        self.jobs.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Run the job called `name` once.
    pub async fn run(&self, name: &str) -> Result<Option<JobRunId>> {
        let job = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown job '{}'", name))?;
        Ok(job.run(&self.services).await)
    }

    /// Register the triggers of every job with `scheduler`.
    pub fn register_all(&self, scheduler: &dyn SchedulingService) -> Result<()> {
        for job in self.jobs.values() {
            job.register(scheduler)?;
        }
        Ok(())
    }
}
