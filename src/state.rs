//! Run outcome classification shared by job runs, action runs and test results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a job run, action run or individual test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running,
    Success,
    Failed,
    Error,
    Skipped,
}

impl RunState {
    /// Stable text form used in the database and in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::NotStarted => "not started",
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Failed => "failed",
            RunState::Error => "error",
            RunState::Skipped => "skipped",
        }
    }

    /// True for the outcomes that end a pipeline early and trigger failure reports.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunState::Failed | RunState::Error)
    }

    /// Fold the states observed during a job run into the job's final state.
    ///
    /// Precedence: Error > Failed > Running > Success. No observations at
    /// all means nothing ran, so the job stays NotStarted.
    pub fn aggregate<I>(states: I) -> RunState
    where
        I: IntoIterator<Item = RunState>,
    {
        let mut seen_any = false;
        let mut failed = false;
        let mut running = false;

        for state in states {
            seen_any = true;
            match state {
                RunState::Error => return RunState::Error,
                RunState::Failed => failed = true,
                RunState::Running => running = true,
                _ => {}
            }
        }

        if !seen_any {
            RunState::NotStarted
        } else if failed {
            RunState::Failed
        } else if running {
            RunState::Running
        } else {
            RunState::Success
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not started" => Ok(RunState::NotStarted),
            "running" => Ok(RunState::Running),
            "success" => Ok(RunState::Success),
            "failed" => Ok(RunState::Failed),
            "error" => Ok(RunState::Error),
            "skipped" => Ok(RunState::Skipped),
            other => anyhow::bail!("unknown run state '{}'", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_not_started() {
        assert_eq!(RunState::aggregate(Vec::new()), RunState::NotStarted);
    }

    #[test]
    fn test_error_wins_over_everything() {
        let states = [RunState::Success, RunState::Failed, RunState::Error, RunState::Running];
        assert_eq!(RunState::aggregate(states), RunState::Error);
    }

    #[test]
    fn test_failed_wins_over_success_and_running() {
        let states = [RunState::Success, RunState::Running, RunState::Failed];
        assert_eq!(RunState::aggregate(states), RunState::Failed);
    }

    #[test]
    fn test_running_wins_over_success() {
        assert_eq!(
            RunState::aggregate([RunState::Success, RunState::Running]),
            RunState::Running
        );
    }

    #[test]
    fn test_all_success() {
        assert_eq!(
            RunState::aggregate([RunState::Success, RunState::Success]),
            RunState::Success
        );
    }

    #[test]
    fn test_skipped_alone_counts_as_success() {
        assert_eq!(RunState::aggregate([RunState::Skipped]), RunState::Success);
    }

    #[test]
    fn test_text_form_parses_back() {
        for state in [
            RunState::NotStarted,
            RunState::Running,
            RunState::Success,
            RunState::Failed,
            RunState::Error,
            RunState::Skipped,
        ] {
            assert_eq!(state.as_str().parse::<RunState>().unwrap(), state);
        }
        assert!("bogus".parse::<RunState>().is_err());
    }
}
