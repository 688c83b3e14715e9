//! Python environment bootstrap, script runs and pytest with JUnit capture.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::{exit_state, junit, Action, ActionContext, ActionError};
use crate::env;
use crate::process;
use crate::state::RunState;

/// Host interpreter used when no virtualenv was created earlier in the run.
#[cfg(windows)]
pub const DEFAULT_PYTHON: &str = "python";
#[cfg(not(windows))]
pub const DEFAULT_PYTHON: &str = "python3";

/// Path of the interpreter inside a virtualenv rooted at `dir`.
pub fn venv_python(dir: &Path) -> PathBuf {
    if cfg!(windows) {
        dir.join("Scripts").join("python.exe")
    } else {
        dir.join("bin").join("python")
    }
}

/// Creates a fresh virtualenv in the action directory and publishes its
/// interpreter under [`env::PYTHON_EXECUTABLE`].
#[derive(Debug, Clone)]
pub struct PythonVirtualEnvAction {
    name: String,
    relpath: PathBuf,
    python: String,
}

impl PythonVirtualEnvAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relpath: PathBuf::new(),
            python: DEFAULT_PYTHON.to_string(),
        }
    }

    pub fn with_relpath(mut self, relpath: impl Into<PathBuf>) -> Self {
        self.relpath = relpath.into();
        self
    }

    /// Interpreter used to create the environment.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }
}

#[async_trait::async_trait]
impl Action for PythonVirtualEnvAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn relpath(&self) -> &Path {
        &self.relpath
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<RunState, ActionError> {
        let opts = process::Options::default();
        let host = ctx.interpolate(std::slice::from_ref(&self.python))?.remove(0);
        let dir = ctx.workdir.display().to_string();

        let create = [host, "-m".into(), "venv".into(), "--clear".into(), dir];
        if ctx.step(&create, &opts).await? != RunState::Success {
            return Ok(RunState::Failed);
        }

        let python = venv_python(&ctx.workdir).display().to_string();
        debug!(%python, "virtualenv interpreter");
        ctx.env.set(env::PYTHON_EXECUTABLE, python.clone());

        let upgrade = [
            python,
            "-m".into(),
            "pip".into(),
            "install".into(),
            "--upgrade".into(),
            "pip".into(),
            "setuptools".into(),
            "wheel".into(),
        ];
        ctx.step(&upgrade, &opts).await
    }
}

/// Runs the active interpreter with configured arguments.
#[derive(Debug, Clone)]
pub struct PythonRunAction {
    name: String,
    relpath: PathBuf,
    args: Vec<String>,
    opts: process::Options,
}

impl PythonRunAction {
    pub fn new(name: impl Into<String>, args: &str) -> Result<Self, ActionError> {
        Ok(Self {
            name: name.into(),
            relpath: PathBuf::new(),
            args: process::split(args)?,
            opts: process::Options::default(),
        })
    }

    pub fn with_relpath(mut self, relpath: impl Into<PathBuf>) -> Self {
        self.relpath = relpath.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.opts.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl Action for PythonRunAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn relpath(&self) -> &Path {
        &self.relpath
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<RunState, ActionError> {
        let mut argv = vec![ctx.python()];
        argv.extend(ctx.interpolate(&self.args)?);
        ctx.step(&argv, &self.opts).await
    }
}

/// Installs pytest, runs it with a JUnit XML report and records one test
/// result per reported test case.
///
/// The action state follows pytest's exit status; the report only feeds
/// the test results.
#[derive(Debug, Clone)]
pub struct PythonTestAction {
    name: String,
    relpath: PathBuf,
    args: Vec<String>,
    opts: process::Options,
}

impl PythonTestAction {
    pub fn new(name: impl Into<String>, args: &str) -> Result<Self, ActionError> {
        Ok(Self {
            name: name.into(),
            relpath: PathBuf::new(),
            args: process::split(args)?,
            opts: process::Options::default(),
        })
    }

    pub fn with_relpath(mut self, relpath: impl Into<PathBuf>) -> Self {
        self.relpath = relpath.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.opts.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl Action for PythonTestAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn relpath(&self) -> &Path {
        &self.relpath
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<RunState, ActionError> {
        let python = ctx.python();

        let install = [
            python.clone(),
            "-m".into(),
            "pip".into(),
            "install".into(),
            "pytest".into(),
        ];
        if ctx.step(&install, &process::Options::default()).await? != RunState::Success {
            return Ok(RunState::Failed);
        }

        let scratch = tempfile::tempdir()
            .map_err(|e| ActionError::io("failed to create report directory", e))?;
        let report = scratch.path().join("junit.xml");

        let mut argv = vec![
            python,
            "-m".into(),
            "pytest".into(),
            format!("--junitxml={}", report.display()),
        ];
        argv.extend(ctx.interpolate(&self.args)?);
        let state = exit_state(&ctx.exec(&argv, &self.opts).await?);

        // A runner that crashes or is killed before collection writes no report.
        let xml = match std::fs::read_to_string(&report) {
            Ok(xml) => xml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ctx.output.push("no test report written".to_string());
                return Ok(state);
            }
            Err(e) => return Err(ActionError::io(format!("failed to read {}", report.display()), e)),
        };
        for case in junit::parse(&xml)? {
            ctx.add_test_result(case.qualified_name(), case.state, case.duration, case.output)?;
        }

        Ok(state)
    }
}
