//! Clone or refresh a git checkout.

use std::path::{Path, PathBuf};

use url::Url;

use super::{Action, ActionContext, ActionError};
use crate::process;
use crate::state::RunState;

pub const DEFAULT_BRANCH: &str = "main";

/// Keeps `<workdir>/<repo name>` at the tip of one branch.
///
/// Steps, stopping at the first that fails: clone (only when the checkout
/// has no `.git` yet), `clean -fdx`, `checkout <branch>`, `pull`.
#[derive(Debug, Clone)]
pub struct GitCheckoutAction {
    name: String,
    relpath: PathBuf,
    url: String,
    dirname: String,
    branch: String,
    git: String,
}

impl GitCheckoutAction {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self, ActionError> {
        let url = url.into();
        let dirname = repository_dirname(&url).ok_or_else(|| ActionError::RepositoryUrl {
            url: url.clone(),
        })?;
        Ok(Self {
            name: name.into(),
            relpath: PathBuf::new(),
            url,
            dirname,
            branch: DEFAULT_BRANCH.to_string(),
            git: "git".to_string(),
        })
    }

    pub fn with_relpath(mut self, relpath: impl Into<PathBuf>) -> Self {
        self.relpath = relpath.into();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Use a specific git executable instead of the one on `PATH`.
    pub fn with_git(mut self, git: impl Into<String>) -> Self {
        self.git = git.into();
        self
    }

    /// Directory name the repository is checked out into.
    pub fn dirname(&self) -> &str {
        &self.dirname
    }
}

/// Last path component of a repository URL without its extension.
///
/// Accepts real URLs (`https://host/org/repo.git`) as well as scp-like
/// (`git@host:org/repo.git`) and local paths.
pub fn repository_dirname(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) if parsed.scheme().len() > 1 => parsed.path().to_string(),
        _ => url.to_string(),
    };

    let last = path
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\', ':'])
        .next()?;

    let stem = Path::new(last).file_stem()?.to_str()?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

#[async_trait::async_trait]
impl Action for GitCheckoutAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn relpath(&self) -> &Path {
        &self.relpath
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<RunState, ActionError> {
        let opts = process::Options::default();
        let words = ctx.interpolate(&[self.url.clone(), self.branch.clone()])?;
        let (url, branch) = (&words[0], &words[1]);
        let repo_dir = ctx.workdir.join(&self.dirname);

        if !repo_dir.join(".git").exists() {
            let argv = [self.git.clone(), "clone".into(), url.clone(), self.dirname.clone()];
            let done = ctx.exec(&argv, &opts).await?;
            if !done.success {
                return Ok(RunState::Failed);
            }
        }

        let steps: [Vec<String>; 3] = [
            vec![self.git.clone(), "clean".into(), "-fdx".into()],
            vec![self.git.clone(), "checkout".into(), branch.clone()],
            vec![self.git.clone(), "pull".into()],
        ];
        for argv in steps {
            let done = ctx.exec_in(&argv, &repo_dir, &opts).await?;
            if !done.success {
                return Ok(RunState::Failed);
            }
        }

        Ok(RunState::Success)
    }
}
