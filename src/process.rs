//! Child-process execution with a faithful transcript.
//!
//! Every invocation is echoed as `> arg0 arg1 ...` before its captured
//! stdout and stderr lines, so a stored action output reads as a replay of
//! what ran.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("empty command line")]
    Empty,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("unbalanced {quote} quote in '{input}'")]
    UnbalancedQuote { quote: char, input: String },

    #[error("trailing backslash in '{input}'")]
    TrailingBackslash { input: String },
}

/// How a command should be launched.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Run the joined argument list through the platform shell.
    pub shell: bool,
    /// Kill the child and report failure once this elapses.
    pub timeout: Option<Duration>,
    /// Extra environment variables for the child.
    pub envs: Vec<(String, String)>,
}

/// Result of a finished invocation.
#[derive(Debug, Clone)]
pub struct Completed {
    pub success: bool,
    pub code: Option<i32>,
}

/// Split a shell-style argument string into words, honoring quotes.
pub fn split(input: &str) -> Result<Vec<String>, SplitError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => {
                            return Err(SplitError::UnbalancedQuote {
                                quote: '\'',
                                input: input.to_string(),
                            })
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(e @ ('"' | '\\' | '$' | '`')) => word.push(e),
                            Some('\n') => {}
                            Some(other) => {
                                word.push('\\');
                                word.push(other);
                            }
                            None => {
                                return Err(SplitError::UnbalancedQuote {
                                    quote: '"',
                                    input: input.to_string(),
                                })
                            }
                        },
                        Some(c) => word.push(c),
                        None => {
                            return Err(SplitError::UnbalancedQuote {
                                quote: '"',
                                input: input.to_string(),
                            })
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some('\n') => {}
                    Some(c) => word.push(c),
                    None => {
                        return Err(SplitError::TrailingBackslash {
                            input: input.to_string(),
                        })
                    }
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }

    if in_word {
        words.push(word);
    }
    Ok(words)
}

/// Run `argv` in `cwd`, appending the invocation line and captured output to `output`.
///
/// In shell mode `argv` is joined and handed to the platform shell as one
/// script. A non-zero exit or a timeout is reported through
/// `Completed::success`; only failing to start or reap the child is an error.
/// Output written before a timeout is kept.
pub async fn run(
    argv: &[String],
    cwd: &Path,
    opts: &Options,
    output: &mut Vec<String>,
) -> Result<Completed, ProcessError> {
    let (program, args) = argv.split_first().ok_or(ProcessError::Empty)?;

    output.push(format!("> {}", argv.join(" ")));
    debug!(%program, cwd = %cwd.display(), "spawning");

    let mut cmd = if opts.shell {
        let mut cmd = shell_command();
        cmd.arg(argv.join(" "));
        cmd
    } else {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        cmd
    };

    cmd.current_dir(cwd)
        .envs(opts.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let (stdout, stdout_task) = capture(child.stdout.take());
    let (stderr, stderr_task) = capture(child.stderr.take());

    let waited = match opts.timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait())
            .await
            .map_err(|_| limit),
        None => Ok(child.wait().await),
    };
    if waited.is_err() {
        if let Err(err) = child.kill().await {
            warn!(%program, error = %err, "failed to kill timed out child");
        }
    }

    // A killed child may leave grandchildren holding the pipes open.
    let grace = waited.is_err().then_some(DRAIN_GRACE);
    drain(stdout_task, grace).await;
    drain(stderr_task, grace).await;

    for buf in [&stdout, &stderr] {
        let bytes = buf.lock().await;
        output.extend(String::from_utf8_lossy(&bytes).lines().map(str::to_string));
    }

    let status = match waited {
        Ok(result) => result.map_err(|source| ProcessError::Wait {
            program: program.clone(),
            source,
        })?,
        Err(limit) => {
            output.push(format!("timed out after {}s", limit.as_secs()));
            return Ok(Completed {
                success: false,
                code: None,
            });
        }
    };

    Ok(Completed {
        success: status.success(),
        code: status.code(),
    })
}

/// How long to keep reading a killed child's pipes.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

type Captured = Arc<Mutex<Vec<u8>>>;

/// Copy everything `pipe` yields into a shared buffer on a background task.
fn capture<R>(pipe: Option<R>) -> (Captured, Option<JoinHandle<()>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = Captured::default();
    let task = pipe.map(|mut pipe| {
        let buf = buf.clone();
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
                }
            }
        })
    });
    (buf, task)
}

async fn drain(task: Option<JoinHandle<()>>, grace: Option<Duration>) {
    let Some(mut task) = task else { return };
    match grace {
        Some(grace) => {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                task.abort();
            }
        }
        None => {
            let _ = task.await;
        }
    }
}

#[cfg(windows)]
fn shell_command() -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C");
    cmd
}

#[cfg(not(windows))]
fn shell_command() -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c");
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        split(s).unwrap()
    }

    #[test]
    fn test_split_plain() {
        assert_eq!(words("echo ok"), vec!["echo", "ok"]);
        assert_eq!(words("  spaced   out  "), vec!["spaced", "out"]);
        assert!(words("").is_empty());
    }

    #[test]
    fn test_split_quotes() {
        assert_eq!(words(r#"echo "hello world""#), vec!["echo", "hello world"]);
        assert_eq!(words("echo 'a \"b\" c'"), vec!["echo", "a \"b\" c"]);
        assert_eq!(words(r#"a"b"'c'"#), vec!["abc"]);
        assert_eq!(words(r#"echo """#), vec!["echo", ""]);
    }

    #[test]
    fn test_split_escapes() {
        assert_eq!(words(r"one\ word"), vec!["one word"]);
        assert_eq!(words(r#""say \"hi\"""#), vec![r#"say "hi""#]);
        assert_eq!(words(r#""keep \n""#), vec![r"keep \n"]);
    }

    #[test]
    fn test_split_errors() {
        assert!(matches!(
            split("echo 'oops"),
            Err(SplitError::UnbalancedQuote { quote: '\'', .. })
        ));
        assert!(matches!(
            split("echo \"oops"),
            Err(SplitError::UnbalancedQuote { quote: '"', .. })
        ));
        assert!(matches!(split("echo \\"), Err(SplitError::TrailingBackslash { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        let argv = words("sh -c 'echo out; echo err >&2'");
        let done = run(&argv, dir.path(), &Options::default(), &mut output)
            .await
            .unwrap();

        assert!(done.success);
        assert_eq!(output, vec!["> sh -c echo out; echo err >&2", "out", "err"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_failure_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        let done = run(&words("sh -c 'exit 3'"), dir.path(), &Options::default(), &mut output)
            .await
            .unwrap();

        assert!(!done.success);
        assert_eq!(done.code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_through_shell() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        let opts = Options {
            shell: true,
            ..Options::default()
        };
        let done = run(&words("echo a && echo b"), dir.path(), &opts, &mut output)
            .await
            .unwrap();

        assert!(done.success);
        assert_eq!(output, vec!["> echo a && echo b", "a", "b"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout_fails_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        let opts = Options {
            timeout: Some(Duration::from_secs(1)),
            ..Options::default()
        };
        let done = run(&words("sleep 5"), dir.path(), &opts, &mut output)
            .await
            .unwrap();

        assert!(!done.success);
        assert_eq!(output.last().unwrap(), "timed out after 1s");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_timeout_keeps_earlier_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        let opts = Options {
            timeout: Some(Duration::from_secs(1)),
            ..Options::default()
        };
        let argv = words("sh -c 'echo early; echo warned >&2; exec sleep 5'");
        let done = run(&argv, dir.path(), &opts, &mut output).await.unwrap();

        assert!(!done.success);
        assert_eq!(done.code, None);
        assert_eq!(
            output,
            vec![
                "> sh -c echo early; echo warned >&2; exec sleep 5",
                "early",
                "warned",
                "timed out after 1s",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = Vec::new();
        let argv = vec!["definitely-not-a-real-program-xyz".to_string()];
        let err = run(&argv, dir.path(), &Options::default(), &mut output)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert_eq!(output, vec!["> definitely-not-a-real-program-xyz"]);
    }
}
