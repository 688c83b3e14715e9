//! MSBuild invocation inside a Visual Studio developer environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{Action, ActionContext, ActionError};
use crate::process;
use crate::state::RunState;

/// Developer-tools setup script shipped with Visual Studio Build Tools.
pub const DEFAULT_SETUP_SCRIPT: &str =
    r"C:\Program Files (x86)\Microsoft Visual Studio\2019\BuildTools\VC\Auxiliary\Build\vcvarsall.bat";
/// Target architecture passed to the setup script.
pub const DEFAULT_SETUP_ARGS: &str = "x64";

/// Optional MSBuild switches. Each is passed only when set.
#[derive(Debug, Clone, Default)]
pub struct MsBuildOptions {
    /// Write a file log (`-fl -flp:LogFile=<path>`).
    pub logfile: Option<String>,
    /// Console verbosity (`-v:<level>`): quiet, minimal, normal, detailed, diagnostic.
    pub verbosity: Option<String>,
    /// Maximum number of concurrent build processes (`-m:<n>`).
    pub max_cpu_count: Option<u32>,
    /// Keep build nodes alive after the build (`-nr:<bool>`).
    pub node_reuse: Option<bool>,
    /// Build properties (`-p:<key>=<value>`), in key order.
    pub properties: BTreeMap<String, String>,
    /// Target to build (`-t:<target>`).
    pub target: Option<String>,
}

impl MsBuildOptions {
    /// Render the configured switches, interpolating values through `interp`.
    fn to_args<F>(&self, mut interp: F) -> Result<Vec<String>, ActionError>
    where
        F: FnMut(&str) -> Result<String, ActionError>,
    {
        let mut args = Vec::new();
        if let Some(logfile) = &self.logfile {
            args.push("-fl".to_string());
            args.push(format!("-flp:LogFile={}", interp(logfile)?));
        }
        if let Some(verbosity) = &self.verbosity {
            args.push(format!("-v:{}", verbosity));
        }
        if let Some(n) = self.max_cpu_count {
            args.push(format!("-m:{}", n));
        }
        if let Some(reuse) = self.node_reuse {
            args.push(format!("-nr:{}", reuse));
        }
        for (key, value) in &self.properties {
            args.push(format!("-p:{}={}", key, interp(value)?));
        }
        if let Some(target) = &self.target {
            args.push(format!("-t:{}", target));
        }
        Ok(args)
    }
}

/// Loads the developer environment from a setup script, then runs MSBuild
/// on a project or solution with it. A failing setup script ends the action.
#[derive(Debug, Clone)]
pub struct MsBuildAction {
    name: String,
    relpath: PathBuf,
    project: String,
    msbuild: String,
    setup_script: String,
    setup_args: Vec<String>,
    options: MsBuildOptions,
    timeout: Option<Duration>,
}

impl MsBuildAction {
    pub fn new(name: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relpath: PathBuf::new(),
            project: project.into(),
            msbuild: "msbuild".to_string(),
            setup_script: DEFAULT_SETUP_SCRIPT.to_string(),
            setup_args: vec![DEFAULT_SETUP_ARGS.to_string()],
            options: MsBuildOptions::default(),
            timeout: None,
        }
    }

    pub fn with_relpath(mut self, relpath: impl Into<PathBuf>) -> Self {
        self.relpath = relpath.into();
        self
    }

    pub fn with_msbuild(mut self, msbuild: impl Into<String>) -> Self {
        self.msbuild = msbuild.into();
        self
    }

    pub fn with_setup_script(mut self, script: impl Into<String>, args: &str) -> Result<Self, ActionError> {
        self.setup_script = script.into();
        self.setup_args = process::split(args)?;
        Ok(self)
    }

    pub fn with_options(mut self, options: MsBuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command that sources the setup script and dumps the resulting
    /// environment into `dump`.
    fn setup_argv(&self, script: &str, args: &[String], dump: &Path) -> Vec<String> {
        if cfg!(windows) {
            vec![
                "cmd".to_string(),
                "/C".to_string(),
                format!(
                    "call \"{}\" {} && set > \"{}\"",
                    script,
                    args.join(" "),
                    dump.display()
                ),
            ]
        } else {
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!(
                    ". \"{}\" {} && env > \"{}\"",
                    script,
                    args.join(" "),
                    dump.display()
                ),
            ]
        }
    }
}

/// `KEY=VALUE` lines of an environment dump; anything else is skipped.
pub fn parse_env_dump(dump: &str) -> Vec<(String, String)> {
    dump.lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| !key.is_empty() && !key.contains(char::is_whitespace))
        .map(|(k, v)| (k.to_string(), v.trim_end_matches('\r').to_string()))
        .collect()
}

#[async_trait::async_trait]
impl Action for MsBuildAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn relpath(&self) -> &Path {
        &self.relpath
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<RunState, ActionError> {
        let scratch = tempfile::tempdir()
            .map_err(|e| ActionError::io("failed to create scratch directory", e))?;
        let dump = scratch.path().join("env.txt");

        let script = ctx.env.interpolate(&self.setup_script)?;
        let setup_args = ctx.interpolate(&self.setup_args)?;
        let setup = self.setup_argv(&script, &setup_args, &dump);
        let done = ctx.exec(&setup, &process::Options::default()).await?;
        if !done.success {
            return Ok(RunState::Failed);
        }

        let captured = std::fs::read_to_string(&dump)
            .map_err(|e| ActionError::io(format!("failed to read {}", dump.display()), e))?;

        let mut argv = vec![self.msbuild.clone(), ctx.env.interpolate(&self.project)?];
        argv.extend(self.options.to_args(|v| Ok(ctx.env.interpolate(v)?))?);

        let opts = process::Options {
            shell: false,
            timeout: self.timeout,
            envs: parse_env_dump(&captured),
        };
        ctx.step(&argv, &opts).await
    }
}
