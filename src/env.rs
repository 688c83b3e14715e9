//! Per-run key/value context threaded through a job's actions.

use std::collections::BTreeMap;

/// Resolved working directory of the action currently running.
pub const WORKDIR: &str = "workdir";
/// Name of the job that owns the run.
pub const JOB_NAME: &str = "job_name";
/// Name of the action currently running.
pub const ACTION_NAME: &str = "action_name";
/// Interpreter created by a `python-venv` action, used by later Python actions.
pub const PYTHON_EXECUTABLE: &str = "python_executable";

/// Mutable string mapping owned by exactly one job run.
///
/// A fresh `Environment` is built for every run and moved into each action
/// in turn, so values written by one action are seen by every later action
/// of the same run and by nothing else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Substitute every `${name}` reference in `input` with its value.
    ///
    /// `$$` produces a literal `$`. A `$` not followed by `{` is kept as is.
    pub fn interpolate(&self, input: &str) -> Result<String, InterpolationError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            if let Some(stripped) = after.strip_prefix('$') {
                out.push('$');
                rest = stripped;
            } else if let Some(body) = after.strip_prefix('{') {
                let end = body.find('}').ok_or_else(|| InterpolationError::Unterminated {
                    input: input.to_string(),
                })?;
                let key = &body[..end];
                let value = self.get(key).ok_or_else(|| InterpolationError::UnknownKey {
                    key: key.to_string(),
                })?;
                out.push_str(value);
                rest = &body[end + 1..];
            } else {
                out.push('$');
                rest = after;
            }
        }
        out.push_str(rest);

        Ok(out)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("undefined environment variable '${{{key}}}'")]
    UnknownKey { key: String },

    #[error("unterminated '${{' in '{input}'")]
    Unterminated { input: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        let mut env = Environment::new();
        env.set(WORKDIR, "/srv/build");
        env.set(PYTHON_EXECUTABLE, "/srv/build/env/bin/python");
        env
    }

    #[test]
    fn test_interpolate_known_keys() {
        let out = env().interpolate("${python_executable} -m build ${workdir}/dist").unwrap();
        assert_eq!(out, "/srv/build/env/bin/python -m build /srv/build/dist");
    }

    #[test]
    fn test_interpolate_plain_text_untouched() {
        assert_eq!(env().interpolate("echo $HOME").unwrap(), "echo $HOME");
        assert_eq!(env().interpolate("no refs").unwrap(), "no refs");
    }

    #[test]
    fn test_double_dollar_escapes() {
        assert_eq!(env().interpolate("$${workdir}").unwrap(), "${workdir}");
    }

    #[test]
    fn test_unknown_key_is_error() {
        assert_eq!(
            env().interpolate("${missing}").unwrap_err(),
            InterpolationError::UnknownKey { key: "missing".into() }
        );
    }

    #[test]
    fn test_unterminated_is_error() {
        assert!(matches!(
            env().interpolate("${workdir"),
            Err(InterpolationError::Unterminated { .. })
        ));
    }

    #[test]
    fn test_set_overwrites() {
        let mut env = env();
        env.set(WORKDIR, "/other");
        assert_eq!(env.get(WORKDIR), Some("/other"));
    }
}
