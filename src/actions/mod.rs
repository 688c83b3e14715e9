//! Pipeline actions and the wrapper that records every action run.
//!
//! An action body only decides Success or Failed from the tools it drives.
//! Anything that goes wrong in the body itself surfaces as an
//! [`ActionError`], which [`run`] turns into an Error action run with the
//! message appended to the transcript.

pub mod command;
pub mod git;
pub mod junit;
pub mod msbuild;
pub mod python;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, warn};

use crate::env::{self, Environment, InterpolationError};
use crate::process::{self, Completed, ProcessError, SplitError};
use crate::state::RunState;
use crate::storage::{ActionRunId, JobRunId, RunStore, TestResult};

pub use command::CommandAction;
pub use git::GitCheckoutAction;
pub use msbuild::{MsBuildAction, MsBuildOptions};
pub use python::{PythonRunAction, PythonTestAction, PythonVirtualEnvAction};

/// Faults raised by an action body, as opposed to a tool reporting failure.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Arguments(#[from] SplitError),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error("malformed test report: {0}")]
    Report(#[from] junit::ReportError),

    #[error("cannot derive a directory name from repository url '{url}'")]
    RepositoryUrl { url: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to record test result: {0}")]
    Store(#[source] anyhow::Error),
}

impl ActionError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ActionError::Io {
            context: context.into(),
            source,
        }
    }
}

/// One configured step of a job pipeline.
#[async_trait::async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Directory relative to the job's working directory in which the action runs.
    fn relpath(&self) -> &Path;

    /// The action body. `ctx.workdir` is already resolved and exists.
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<RunState, ActionError>;
}

/// Everything an action body may read or append to while it runs.
pub struct ActionContext<'a> {
    pub workdir: PathBuf,
    pub env: Environment,
    pub output: Vec<String>,
    store: &'a dyn RunStore,
    action_run: ActionRunId,
}

impl<'a> ActionContext<'a> {
    /// Substitute `${name}` references from the environment into every word.
    pub fn interpolate(&self, words: &[String]) -> Result<Vec<String>, ActionError> {
        words
            .iter()
            .map(|w| self.env.interpolate(w).map_err(ActionError::from))
            .collect()
    }

    /// Run `argv` in the action's directory.
    pub async fn exec(&mut self, argv: &[String], opts: &process::Options) -> Result<Completed, ActionError> {
        Ok(process::run(argv, &self.workdir, opts, &mut self.output).await?)
    }

    /// Run `argv` in an arbitrary directory.
    pub async fn exec_in(
        &mut self,
        argv: &[String],
        cwd: &Path,
        opts: &process::Options,
    ) -> Result<Completed, ActionError> {
        Ok(process::run(argv, cwd, opts, &mut self.output).await?)
    }

    /// Run `argv` and map its exit status to Success or Failed.
    pub async fn step(&mut self, argv: &[String], opts: &process::Options) -> Result<RunState, ActionError> {
        Ok(exit_state(&self.exec(argv, opts).await?))
    }

    /// Interpreter for Python actions: the one recorded by a virtualenv
    /// action earlier in the run, else the host interpreter.
    pub fn python(&self) -> String {
        self.env
            .get(env::PYTHON_EXECUTABLE)
            .map(str::to_string)
            .unwrap_or_else(|| python::DEFAULT_PYTHON.to_string())
    }

    /// Record one test case against the current action run.
    pub fn add_test_result(
        &self,
        name: String,
        state: RunState,
        duration: Duration,
        output: Option<String>,
    ) -> Result<(), ActionError> {
        self.store
            .create_test_result(&TestResult {
                action_run: self.action_run,
                name,
                state,
                duration,
                output,
            })
            .map_err(ActionError::Store)
    }
}

pub(crate) fn exit_state(done: &Completed) -> RunState {
    if done.success {
        RunState::Success
    } else {
        RunState::Failed
    }
}

/// Run one action as part of `job_run`, recording it in `store`.
///
/// The environment is moved in and handed back, updated with this action's
/// working directory, job name and action name plus whatever the action
/// body added. Faults never escape: they become an Error run.
pub async fn run(
    action: &dyn Action,
    job_name: &str,
    job_run: JobRunId,
    workdir: &Path,
    mut environment: Environment,
    store: &dyn RunStore,
) -> (RunState, Environment) {
    let resolved = workdir.join(action.relpath());
    environment.set(env::WORKDIR, resolved.display().to_string());
    environment.set(env::JOB_NAME, job_name);
    environment.set(env::ACTION_NAME, action.name());

    let action_run = match store.create_action_run(action.name(), job_run) {
        Ok(id) => id,
        Err(e) => {
            error!(action = %action.name(), "Failed to create action run: {:#}", e);
            return (RunState::Error, environment);
        }
    };
    let start = Instant::now();

    let mut ctx = ActionContext {
        workdir: resolved,
        env: environment,
        output: Vec::new(),
        store,
        action_run,
    };

    let result = match std::fs::create_dir_all(&ctx.workdir) {
        Ok(()) => action.execute(&mut ctx).await,
        Err(e) => Err(ActionError::io(
            format!("failed to create {}", ctx.workdir.display()),
            e,
        )),
    };

    let state = match result {
        Ok(state) => state,
        Err(e) => {
            warn!(action = %action.name(), "Action raised: {}", e);
            ctx.output.push(e.to_string());
            RunState::Error
        }
    };

    let output = ctx.output.join("\n");
    if let Err(e) = store.finalize_action_run(action_run, state, &output, start.elapsed()) {
        error!(action = %action.name(), "Failed to finalize action run: {:#}", e);
    }

    (state, ctx.env)
}


#[cfg(test)]
mod tests {
    use super::testing::{Outcome, ScriptedAction};
    use super::*;
    use crate::storage::SqliteRunStore;

    fn store() -> (tempfile::TempDir, SqliteRunStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let store = SqliteRunStore::open(path.to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_run_merges_context_into_env() {
        let (dir, store) = store();
        let job = store.create_job_run("job").unwrap();
        let mut action = ScriptedAction::new("build", Outcome::Return(RunState::Success));
        action.relpath = PathBuf::from("sub");

        let mut env = Environment::new();
        env.set(env::ACTION_NAME, "previous");
        let (state, env) = run(&action, "job", job, dir.path(), env, &store).await;

        assert_eq!(state, RunState::Success);
        assert_eq!(env.get(env::ACTION_NAME), Some("build"));
        assert_eq!(env.get(env::JOB_NAME), Some("job"));
        let expected = dir.path().join("sub").display().to_string();
        assert_eq!(env.get(env::WORKDIR), Some(expected.as_str()));
        assert!(dir.path().join("sub").is_dir());
    }

    #[tokio::test]
    async fn test_fault_becomes_error_with_message() {
        let (dir, store) = store();
        let job = store.create_job_run("job").unwrap();
        let action = ScriptedAction::new("broken", Outcome::Raise("report unreadable".into()));

        let (state, _) = run(&action, "job", job, dir.path(), Environment::new(), &store).await;

        assert_eq!(state, RunState::Error);
        let report = store.job_run_report(job).unwrap();
        assert_eq!(report.actions.len(), 1);
        let recorded = &report.actions[0].run;
        assert_eq!(recorded.state, RunState::Error);
        assert_eq!(recorded.output.as_deref(), Some("report unreadable: boom"));
        assert!(recorded.duration.is_some());
    }

    #[tokio::test]
    async fn test_values_set_by_action_are_returned() {
        let (dir, store) = store();
        let job = store.create_job_run("job").unwrap();
        let action = ScriptedAction::new("venv", Outcome::Set("python_executable".into(), "/x/py".into()));

        let (_, env) = run(&action, "job", job, dir.path(), Environment::new(), &store).await;
        assert_eq!(env.get(env::PYTHON_EXECUTABLE), Some("/x/py"));
    }
}
