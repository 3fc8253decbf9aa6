//! Subprocess execution: bounded one-shot commands (fetch, build) and
//! detached long-running services.

pub mod managed;

pub use managed::{ManagedProcess, is_pid_alive};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};

/// Terminal result of a subprocess that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("could not start process: {0}")]
    SpawnFailed(String),
    #[error("process exited with code {0}")]
    NonZeroExit(i32),
    #[error("process timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// What to run and where.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, working_dir: &Path) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.to_path_buf(),
            env: Vec::new(),
        }
    }

    /// Run an operator-supplied command line through `sh -c`.
    pub fn shell(line: &str, working_dir: &Path) -> Self {
        Self::new("sh", vec!["-c".into(), line.to_string()], working_dir)
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    fn describe(&self) -> String {
        if self.program == "sh" && self.args.len() == 2 && self.args[0] == "-c" {
            return self.args[1].clone();
        }
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

// ── Log sink ───────────────────────────────────────────────────

/// Open the log in append mode and write a header line for this run.
/// Returns separate handles for stdout and stderr.
fn open_log(log: &Path, header: &str) -> std::io::Result<(fs::File, fs::File)> {
    if let Some(parent) = log.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = fs::OpenOptions::new().create(true).append(true).open(log)?;
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    writeln!(out, "[{stamp}] {header}")?;
    let err = out.try_clone()?;
    Ok((out, err))
}

// ── One-shot commands ──────────────────────────────────────────

/// Run a command to completion with its output appended to `log`.
///
/// The child (and its process group) is killed when `timeout` elapses.
pub async fn run(spec: &CommandSpec, log: &Path, timeout: Duration) -> Result<(), RunError> {
    let (out, err) = open_log(log, &format!("$ {}", spec.describe()))
        .map_err(|e| RunError::SpawnFailed(format!("cannot open log {}: {e}", log.display())))?;

    let mut cmd = spec.command();
    cmd.stdout(out).stderr(err).kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| RunError::SpawnFailed(format!("{}: {e}", spec.program)))?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(RunError::NonZeroExit(status.code().unwrap_or(-1))),
        Ok(Err(e)) => Err(RunError::SpawnFailed(format!("wait failed: {e}"))),
        Err(_) => {
            tracing::warn!(
                "command timed out after {}s, killing: {}",
                timeout.as_secs(),
                spec.describe()
            );
            if let Some(pid) = child.id() {
                ManagedProcess::from_pid(pid).kill();
            }
            let _ = child.kill().await;
            Err(RunError::TimedOut(timeout))
        }
    }
}

// ── Detached services ──────────────────────────────────────────

/// Start a long-running service in its own process group and return at once.
///
/// A background task owns the child and reaps it when it exits, so a dead
/// service never lingers as a zombie that still answers `kill(pid, 0)`.
pub fn launch(spec: &CommandSpec, log: &Path) -> Result<ManagedProcess, RunError> {
    let (out, err) = open_log(log, &format!("launching: {}", spec.describe()))
        .map_err(|e| RunError::SpawnFailed(format!("cannot open log {}: {e}", log.display())))?;

    let mut cmd = spec.command();
    cmd.stdout(out).stderr(err);

    let mut child = cmd
        .spawn()
        .map_err(|e| RunError::SpawnFailed(format!("{}: {e}", spec.program)))?;
    let pid = child
        .id()
        .ok_or_else(|| RunError::SpawnFailed("process exited before reporting a pid".into()))?;

    let description = spec.describe();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => tracing::info!("process {pid} ({description}) exited: {status}"),
            Err(e) => tracing::warn!("failed to wait on process {pid}: {e}"),
        }
    });

    Ok(ManagedProcess::from_pid(pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn successful_run_appends_output() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("out.log");
        let spec = CommandSpec::shell("echo hello; echo oops 1>&2", tmp.path());

        run(&spec, &log, Duration::from_secs(10)).await.unwrap();
        run(&spec, &log, Duration::from_secs(10)).await.unwrap();

        let text = fs::read_to_string(&log).unwrap();
        assert_eq!(text.matches("hello").count(), 2);
        assert_eq!(text.matches("oops").count(), 2);
        assert!(text.contains("$ echo hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("out.log");
        let spec = CommandSpec::shell("echo failing; exit 2", tmp.path());

        let err = run(&spec, &log, Duration::from_secs(10)).await.unwrap_err();
        assert_eq!(err, RunError::NonZeroExit(2));
        assert!(fs::read_to_string(&log).unwrap().contains("failing"));
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("out.log");
        let spec = CommandSpec::shell("sleep 30", tmp.path());

        let started = std::time::Instant::now();
        let err = run(&spec, &log, Duration::from_millis(300)).await.unwrap_err();
        assert_eq!(err, RunError::TimedOut(Duration::from_millis(300)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let tmp = TempDir::new().unwrap();
        let spec = CommandSpec::new("definitely-not-a-real-binary-zcfleet", vec![], tmp.path());
        let err = run(&spec, &tmp.path().join("log"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn env_and_working_dir_are_applied() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("out.log");
        let spec = CommandSpec::shell("echo \"$GREETING from $(pwd)\"", tmp.path())
            .with_env(vec![("GREETING".into(), "hi".into())]);

        run(&spec, &log, Duration::from_secs(10)).await.unwrap();
        let text = fs::read_to_string(&log).unwrap();
        let cwd = fs::canonicalize(tmp.path()).unwrap();
        assert!(text.contains(&format!("hi from {}", cwd.display())), "log was: {text}");
    }

    #[tokio::test]
    async fn launch_returns_live_handle() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("svc.log");
        let spec = CommandSpec::shell("echo up; exec sleep 30", tmp.path());

        let process = launch(&spec, &log).unwrap();
        assert!(process.is_alive());

        process.terminate(Duration::from_secs(2)).await;
        assert!(!process.is_alive());
        assert!(fs::read_to_string(&log).unwrap().contains("launching: echo up"));
    }

    #[test]
    fn describe_unwraps_shell_lines() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(CommandSpec::shell("npm start", tmp.path()).describe(), "npm start");
        let git = CommandSpec::new("git", vec!["clone".into(), "url".into()], tmp.path());
        assert_eq!(git.describe(), "git clone url");
    }
}
