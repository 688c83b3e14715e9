//! Smoke tests -- verify the binary runs and its subcommands work end to end.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

fn cdrun() -> Command {
    let mut cmd = Command::cargo_bin("cdrun").unwrap();
    cmd.env_remove("CDRUN_CONFIG").env_remove("RUST_LOG");
    cmd
}

/// Config file keeping the database and working directory inside `dir`.
fn config(dir: &Path) -> PathBuf {
    let path = dir.join("cdrun.toml");
    std::fs::write(
        &path,
        format!(
            "[storage]\ndatabase = \"{}\"\n\n[jobs]\nworkdir = \"{}\"\n\n[logging]\nlevel = \"warn\"\n",
            dir.join("runs.db").display(),
            dir.join("work").display()
        ),
    )
    .unwrap();
    path
}

fn job(dir: &Path, file: &str, text: &str) -> PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_cli_help() {
    cdrun()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("continuous-delivery job runner"));
}

#[test]
fn test_cli_version() {
    cdrun()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cdrun"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "run", "next", "history"] {
        cdrun().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_run_requires_a_file() {
    cdrun().arg("run").assert().failure();
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    cdrun()
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .args(["history"])
        .assert()
        .failure();
}

#[test]
fn test_next_reports_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let cron = job(
        dir.path(),
        "nightly.yml",
        "name: nightly\ntriggers:\n  - uses: cron\n    expr: \"0 3 * * *\"\n",
    );
    let manual = job(dir.path(), "manual.yml", "name: manual\n");

    cdrun()
        .arg("--config")
        .arg(&cfg)
        .arg("next")
        .arg(&cron)
        .arg(&manual)
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"nightly\s+\d{4}-\d{2}-\d{2}T03:00:00").unwrap())
        .stdout(predicate::str::is_match(r"manual\s+never").unwrap());
}

#[test]
fn test_next_rejects_bad_cron() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let bad = job(
        dir.path(),
        "bad.yml",
        "name: bad\ntriggers:\n  - uses: cron\n    expr: \"every day\"\n",
    );

    cdrun()
        .arg("--config")
        .arg(&cfg)
        .arg("next")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid cron expression"));
}

#[cfg(unix)]
#[test]
fn test_run_then_history() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let hello = job(
        dir.path(),
        "hello.yml",
        "name: hello\nactions:\n  - name: greet\n    uses: command\n    args: echo hello\n",
    );

    cdrun()
        .arg("--config")
        .arg(&cfg)
        .arg("run")
        .arg(&hello)
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"hello\s+success").unwrap());

    cdrun()
        .arg("--config")
        .arg(&cfg)
        .args(["history", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"hello\""))
        .stdout(predicate::str::contains("\"state\": \"success\""));

    cdrun()
        .arg("--config")
        .arg(&cfg)
        .args(["history", "--job", "other"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No job runs found."));
}

#[cfg(unix)]
#[test]
fn test_failed_run_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let broken = job(
        dir.path(),
        "broken.yml",
        "name: broken\nactions:\n  - name: nope\n    uses: command\n    args: \"false\"\n",
    );

    cdrun()
        .arg("--config")
        .arg(&cfg)
        .arg("run")
        .arg(&broken)
        .assert()
        .failure()
        .stdout(predicate::str::is_match(r"broken\s+failed").unwrap());
}

#[test]
fn test_bad_env_config_warns_and_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("broken.toml");
    std::fs::write(&broken, "[storage\ndatabase = ").unwrap();

    cdrun()
        .current_dir(dir.path())
        .env("CDRUN_CONFIG", &broken)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No job runs found."))
        .stderr(predicate::str::contains(
            "CDRUN_CONFIG set but file could not be loaded",
        ));
}
