//! Declarative job files.
//!
//! A job file is a YAML document:
//!
//! ```yaml
//! name: nightly
//! workdir: /srv/cd/nightly
//! triggers:
//!   - uses: cron
//!     expr: "0 4 * * Sun"
//! actions:
//!   - name: checkout
//!     uses: git-checkout
//!     repos_url: https://github.com/org/project.git
//!   - name: venv
//!     uses: python-venv
//!     relpath: env
//!   - name: tests
//!     uses: python-pytest
//!     relpath: project
//!     args: tests -x
//! notifications:
//!   - uses: email
//!     recipients: [dev@example.com]
//! ```
//!
//! Every `uses` discriminator maps onto a closed enum, so an unknown value
//! is rejected while the file is parsed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::actions::{
    ActionError, CommandAction, GitCheckoutAction, MsBuildAction, MsBuildOptions,
    PythonRunAction, PythonTestAction, PythonVirtualEnvAction,
};
use crate::actions::{git, msbuild, Action};
use crate::job::Job;
use crate::notifications::EmailNotification;
use crate::triggers::CronTrigger;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("job '{job}', action '{action}': {source}")]
    Action {
        job: String,
        action: String,
        #[source]
        source: ActionError,
    },

    #[error("job '{job}': invalid cron expression '{expr}': {source}")]
    Cron {
        job: String,
        expr: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("duplicate job name '{name}'")]
    DuplicateJob { name: String },
}

#[derive(Debug, Deserialize)]
pub struct JobFile {
    pub name: String,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub notifications: Vec<NotificationSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub relpath: PathBuf,
    #[serde(flatten)]
    pub kind: ActionKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "uses", rename_all = "kebab-case")]
pub enum ActionKind {
    Command {
        args: String,
        #[serde(default)]
        shell: bool,
        #[serde(default)]
        timeout: Option<u64>,
    },
    GitCheckout {
        repos_url: String,
        #[serde(default = "default_branch")]
        branch: String,
        #[serde(default)]
        git: Option<String>,
    },
    PythonVenv {
        #[serde(default)]
        python: Option<String>,
    },
    PythonRun {
        args: String,
        #[serde(default)]
        timeout: Option<u64>,
    },
    PythonPytest {
        #[serde(default)]
        args: String,
        #[serde(default)]
        timeout: Option<u64>,
    },
    Msbuild {
        project: String,
        #[serde(default)]
        msbuild: Option<String>,
        #[serde(default)]
        setup_script: Option<String>,
        #[serde(default)]
        setup_args: Option<String>,
        #[serde(default)]
        logfile: Option<String>,
        #[serde(default)]
        verbosity: Option<String>,
        #[serde(default)]
        max_cpu_count: Option<u32>,
        #[serde(default)]
        node_reuse: Option<bool>,
        #[serde(default)]
        properties: BTreeMap<String, String>,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        timeout: Option<u64>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "uses", rename_all = "kebab-case")]
pub enum TriggerSpec {
    Cron { expr: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "uses", rename_all = "kebab-case")]
pub enum NotificationSpec {
    Email {
        recipients: Vec<String>,
        #[serde(default)]
        on_success: bool,
        #[serde(default = "default_true")]
        on_failure: bool,
    },
}

fn default_branch() -> String {
    git::DEFAULT_BRANCH.to_string()
}

fn default_true() -> bool {
    true
}

fn seconds(timeout: Option<u64>) -> Option<Duration> {
    timeout.map(Duration::from_secs)
}

/// Read and build the job described by `path`.
///
/// Jobs without a `workdir` run in `default_workdir`.
pub fn load_job(path: &Path, default_workdir: &Path) -> Result<Job, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_job_from(&text, default_workdir, path)
}

/// Build a job from YAML text.
pub fn parse_job(text: &str, default_workdir: &Path) -> Result<Job, ConfigError> {
    parse_job_from(text, default_workdir, Path::new("<inline>"))
}

fn parse_job_from(text: &str, default_workdir: &Path, origin: &Path) -> Result<Job, ConfigError> {
    let file: JobFile = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    file.build(default_workdir)
}

impl JobFile {
    pub fn build(self, default_workdir: &Path) -> Result<Job, ConfigError> {
        let workdir = match self.workdir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => default_workdir.join(dir),
            None => default_workdir.to_path_buf(),
        };
        let mut job = Job::new(self.name.clone(), workdir);

        for spec in self.triggers {
            match spec {
                TriggerSpec::Cron { expr } => {
                    let trigger = CronTrigger::new(expr.clone()).map_err(|source| ConfigError::Cron {
                        job: self.name.clone(),
                        expr,
                        source,
                    })?;
                    job.push_trigger(Box::new(trigger));
                }
            }
        }

        for spec in self.actions {
            let action_name = spec.name.clone();
            let action = spec.build().map_err(|source| ConfigError::Action {
                job: self.name.clone(),
                action: action_name,
                source,
            })?;
            job.push_action(action);
        }

        for spec in self.notifications {
            match spec {
                NotificationSpec::Email {
                    recipients,
                    on_success,
                    on_failure,
                } => {
                    let email = EmailNotification::new(recipients)
                        .on_success(on_success)
                        .on_failure(on_failure);
                    job.push_notification(Box::new(email));
                }
            }
        }

        Ok(job)
    }
}

impl ActionSpec {
    fn build(self) -> Result<Box<dyn Action>, ActionError> {
        let ActionSpec { name, relpath, kind } = self;

        let action: Box<dyn Action> = match kind {
            ActionKind::Command { args, shell, timeout } => Box::new(
                CommandAction::new(name, &args)?
                    .with_relpath(relpath)
                    .with_shell(shell)
                    .with_timeout(seconds(timeout)),
            ),
            ActionKind::GitCheckout { repos_url, branch, git } => {
                let mut action = GitCheckoutAction::new(name, repos_url)?
                    .with_relpath(relpath)
                    .with_branch(branch);
                if let Some(git) = git {
                    action = action.with_git(git);
                }
                Box::new(action)
            }
            ActionKind::PythonVenv { python } => {
                let mut action = PythonVirtualEnvAction::new(name).with_relpath(relpath);
                if let Some(python) = python {
                    action = action.with_python(python);
                }
                Box::new(action)
            }
            ActionKind::PythonRun { args, timeout } => Box::new(
                PythonRunAction::new(name, &args)?
                    .with_relpath(relpath)
                    .with_timeout(seconds(timeout)),
            ),
            ActionKind::PythonPytest { args, timeout } => Box::new(
                PythonTestAction::new(name, &args)?
                    .with_relpath(relpath)
                    .with_timeout(seconds(timeout)),
            ),
            ActionKind::Msbuild {
                project,
                msbuild,
                setup_script,
                setup_args,
                logfile,
                verbosity,
                max_cpu_count,
                node_reuse,
                properties,
                target,
                timeout,
            } => {
                let mut action = MsBuildAction::new(name, project)
                    .with_relpath(relpath)
                    .with_options(MsBuildOptions {
                        logfile,
                        verbosity,
                        max_cpu_count,
                        node_reuse,
                        properties,
                        target,
                    })
                    .with_timeout(seconds(timeout));
                if let Some(msbuild) = msbuild {
                    action = action.with_msbuild(msbuild);
                }
                if setup_script.is_some() || setup_args.is_some() {
                    let script = setup_script.unwrap_or_else(|| msbuild::DEFAULT_SETUP_SCRIPT.to_string());
                    let args = setup_args.unwrap_or_else(|| msbuild::DEFAULT_SETUP_ARGS.to_string());
                    action = action.with_setup_script(script, &args)?;
                }
                Box::new(action)
            }
        };

        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::path::Path;

    const NIGHTLY: &str = r#"
name: nightly
triggers:
  - uses: cron
    expr: "0 4 * * Sun"
actions:
  - name: checkout
    uses: git-checkout
    repos_url: https://github.com/org/project.git
  - name: venv
    uses: python-venv
    relpath: env
  - name: tests
    uses: python-pytest
    relpath: project
    args: tests -x
    timeout: 600
  - name: build
    uses: msbuild
    project: app.sln
    max_cpu_count: 4
    properties:
      Configuration: Release
notifications:
  - uses: email
    recipients: [dev@example.com, ops@example.com]
    on_success: true
"#;

    #[test]
    fn test_parse_full_job() {
        let job = parse_job(NIGHTLY, Path::new("/srv/cd")).unwrap();
        assert_eq!(job.name(), "nightly");
        assert_eq!(job.workdir(), Path::new("/srv/cd"));

        let names: Vec<_> = job.actions().iter().map(|a| a.name()).collect();
        assert_eq!(names, ["checkout", "venv", "tests", "build"]);
        assert_eq!(job.actions()[1].relpath(), Path::new("env"));
        assert_eq!(job.actions()[2].relpath(), Path::new("project"));
        assert_eq!(job.actions()[0].relpath(), Path::new(""));

        assert_eq!(job.triggers().len(), 1);
        assert_eq!(job.triggers()[0].to_string(), "cron (0 4 * * Sun)");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(
            job.next_run_after(now),
            Some(Utc.with_ymd_and_hms(2024, 5, 5, 4, 0, 0).unwrap())
        );

        assert_eq!(job.notifications().len(), 1);
        assert_eq!(
            job.notifications()[0].to_string(),
            "email (dev@example.com, ops@example.com)"
        );
    }

    #[test]
    fn test_workdir_resolution() {
        let abs = parse_job("name: a\nworkdir: /opt/a\n", Path::new("/srv/cd")).unwrap();
        assert_eq!(abs.workdir(), Path::new("/opt/a"));

        let rel = parse_job("name: b\nworkdir: b\n", Path::new("/srv/cd")).unwrap();
        assert_eq!(rel.workdir(), Path::new("/srv/cd/b"));
    }

    #[test]
    fn test_minimal_job_has_nothing_configured() {
        let job = parse_job("name: empty\n", Path::new("/tmp")).unwrap();
        assert!(job.actions().is_empty());
        assert!(job.triggers().is_empty());
        assert!(job.notifications().is_empty());
        assert!(job.next_run().is_none());
    }

    #[test]
    fn test_unknown_discriminator_is_rejected() {
        let text = "name: x\nactions:\n  - name: a\n    uses: docker\n    image: alpine\n";
        assert!(matches!(
            parse_job(text, Path::new("/tmp")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_cron_is_rejected() {
        let text = "name: x\ntriggers:\n  - uses: cron\n    expr: not a schedule\n";
        match parse_job(text, Path::new("/tmp")) {
            Err(ConfigError::Cron { job, expr, .. }) => {
                assert_eq!(job, "x");
                assert_eq!(expr, "not a schedule");
            }
            other => panic!("unexpected: {:?}", other.map(|j| j.name().to_string())),
        }
    }

    #[test]
    fn test_bad_arguments_name_the_action() {
        let text = "name: x\nactions:\n  - name: quoted\n    uses: command\n    args: echo \"open\n";
        match parse_job(text, Path::new("/tmp")) {
            Err(ConfigError::Action { job, action, .. }) => {
                assert_eq!(job, "x");
                assert_eq!(action, "quoted");
            }
            other => panic!("unexpected: {:?}", other.map(|j| j.name().to_string())),
        }
    }

    #[test]
    fn test_bad_repository_url_is_rejected() {
        let text = "name: x\nactions:\n  - name: co\n    uses: git-checkout\n    repos_url: \"\"\n";
        assert!(matches!(
            parse_job(text, Path::new("/tmp")),
            Err(ConfigError::Action { .. })
        ));
    }

    #[test]
    fn test_load_job_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yml");
        match load_job(&missing, dir.path()) {
            Err(ConfigError::Read { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected: {:?}", other.map(|j| j.name().to_string())),
        }
    }

    #[test]
    fn test_load_job_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.yml");
        std::fs::write(&path, "name: echo\nactions:\n  - name: hi\n    uses: command\n    args: echo hi\n").unwrap();

        let job = load_job(&path, dir.path()).unwrap();
        assert_eq!(job.name(), "echo");
        assert_eq!(job.actions().len(), 1);
    }
}
