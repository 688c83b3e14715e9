//! Run an arbitrary command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Action, ActionContext, ActionError};
use crate::process;
use crate::state::RunState;

/// Runs a tokenized command line; Success iff it exits with 0.
///
/// In shell mode the line is passed to the shell as written, quoting
/// included, after interpolation.
#[derive(Debug, Clone)]
pub struct CommandAction {
    name: String,
    relpath: PathBuf,
    line: String,
    args: Vec<String>,
    opts: process::Options,
}

impl CommandAction {
    /// Tokenize `args` now so quoting mistakes surface when the job is loaded.
    pub fn new(name: impl Into<String>, args: &str) -> Result<Self, ActionError> {
        Ok(Self {
            name: name.into(),
            relpath: PathBuf::new(),
            line: args.to_string(),
            args: process::split(args)?,
            opts: process::Options::default(),
        })
    }

    pub fn with_relpath(mut self, relpath: impl Into<PathBuf>) -> Self {
        self.relpath = relpath.into();
        self
    }

    /// Hand the command line to `sh -c` (`cmd /C` on Windows).
    pub fn with_shell(mut self, shell: bool) -> Self {
        self.opts.shell = shell;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.opts.timeout = timeout;
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait::async_trait]
impl Action for CommandAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn relpath(&self) -> &Path {
        &self.relpath
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<RunState, ActionError> {
        let argv = if self.opts.shell && !self.args.is_empty() {
            ctx.interpolate(std::slice::from_ref(&self.line))?
        } else {
            ctx.interpolate(&self.args)?
        };
        ctx.step(&argv, &self.opts).await
    }
}
