//! Engine subprocess execution.
//!
//! Every engine invocation goes through a [`CommandRunner`] so provisioners
//! can be exercised without spawning real binaries.
//!
//! Children are tied to the lifetime of the run: an interrupt, `SIGTERM` or
//! `SIGHUP` received while a child runs gives it a grace period and then kills
//! it, and a dropped child is killed. Termination of this process that runs no
//! code at all (`SIGKILL`, an aborting panic) still leaves the child running;
//! that case is best effort only. Once a child has run, these signals stay
//! handled by the runtime for the rest of the process.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};

/// Grace period a child gets after a stop request before it is killed.
const INTERRUPT_GRACE_SECS: u64 = 30;

/// Exit code reported for a child terminated by a signal.
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// A fully resolved engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    /// Engine binary.
    pub program: PathBuf,
    /// Arguments, including the action.
    pub args: Vec<String>,
    /// Action label used in errors and logs.
    pub action: String,
    /// Working directory of the child.
    pub working_dir: PathBuf,
    /// Extra environment variables.
    pub envs: Vec<(String, String)>,
    /// Attach the child to this process's output streams.
    pub show_output: bool,
}

impl EngineCommand {
    /// Creates a command for an action.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, action: &str, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            action: action.to_string(),
            working_dir: working_dir.into(),
            envs: Vec::new(),
            show_output: false,
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Sets whether output is shown.
    #[must_use]
    pub const fn with_output(mut self, show_output: bool) -> Self {
        self.show_output = show_output;
        self
    }

    /// Returns true if the arguments contain `arg`.
    #[must_use]
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl std::fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Formats a boolean-style flag: `-key`.
#[must_use]
pub fn flag(key: &str) -> String {
    format!("-{key}")
}

/// Formats a valued flag: `-key=value`.
#[must_use]
pub fn flag_with(key: &str, value: impl std::fmt::Display) -> String {
    format!("-{key}={value}")
}

/// Runs engine commands to completion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be started, or if it was
    /// interrupted by the operator.
    async fn run(&self, command: &EngineCommand) -> Result<i32>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Time a child gets to exit after a stop request before it is killed.
    grace: Duration,
}

impl ProcessRunner {
    /// Creates a runner with the default grace period.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            grace: Duration::from_secs(INTERRUPT_GRACE_SECS),
        }
    }

    /// Sets the grace period.
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

/// Resolves with the signal name once this process is asked to stop.
#[cfg(unix)]
async fn stop_requested() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "interrupt"),
        _ = terminate.recv() => Ok("SIGTERM"),
        _ = hangup.recv() => Ok("SIGHUP"),
    }
}

/// Resolves with the signal name once this process is asked to stop.
#[cfg(not(unix))]
async fn stop_requested() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "interrupt")
}

/// Gives a child `grace` to exit, then kills it.
///
/// An interrupt reaches the child through the shared process group; other
/// stop signals do not, so the child may use the whole grace period.
async fn shut_down(child: &mut Child, grace: Duration, action: &str) {
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!("Killing {action}");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &EngineCommand) -> Result<i32> {
        info!("Running {} in {}", command.action, command.working_dir.display());
        debug!("Command: {command}");

        let output = || {
            if command.show_output {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k, v)))
            .current_dir(&command.working_dir)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProvisionError::Spawn {
                action: command.action.clone(),
                message: format!("{}: {e}", command.program.display()),
            })?;

        let status = tokio::select! {
            status = child.wait() => status?,
            stop = stop_requested() => match stop {
                Ok(signal) => {
                    warn!(
                        "Received {signal}, waiting up to {}s for {} to exit",
                        self.grace.as_secs(),
                        command.action
                    );
                    shut_down(&mut child, self.grace, &command.action).await;
                    return Err(ProvisionError::Interrupted {
                        action: command.action.clone(),
                    }
                    .into());
                }
                Err(e) => {
                    warn!("Cannot watch for stop signals: {e}");
                    child.wait().await?
                }
            },
        };

        let code = status.code().unwrap_or(SIGNAL_EXIT_CODE);
        debug!("{} exited with code {code}", command.action);
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KestrelError;

    fn shell(script: &str) -> EngineCommand {
        EngineCommand::new("/bin/sh", "test", std::env::temp_dir()).args(["-c", script])
    }

    #[test]
    fn test_flags() {
        assert_eq!(flag("auto-approve"), "-auto-approve");
        assert_eq!(flag_with("parallelism", 10), "-parallelism=10");
        assert_eq!(flag_with("lock-timeout", "0s"), "-lock-timeout=0s");
    }

    #[test]
    fn test_command_builder() {
        let cmd = EngineCommand::new("/usr/bin/terraform", "plan", "/work")
            .arg("plan")
            .args(["-input=false", "-no-color"])
            .with_output(true);

        assert!(cmd.has_arg("-no-color"));
        assert!(cmd.show_output);
        assert_eq!(cmd.to_string(), "/usr/bin/terraform plan -input=false -no-color");
    }

    #[tokio::test]
    async fn test_exit_codes_are_reported() {
        let runner = ProcessRunner::new();

        assert_eq!(runner.run(&shell("exit 0")).await.expect("run"), 0);
        assert_eq!(runner.run(&shell("exit 2")).await.expect("run"), 2);
    }

    #[tokio::test]
    async fn test_signal_exit_code() {
        let runner = ProcessRunner::new();
        let code = runner.run(&shell("kill -9 $$")).await.expect("run");

        assert_eq!(code, SIGNAL_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cmd = EngineCommand::new("/bin/sh", "touch", dir.path()).args(["-c", "touch marker"]);

        ProcessRunner::new().run(&cmd).await.expect("run");
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_environment_is_passed() {
        let cmd = shell("test \"$KESTREL_MARKER\" = yes").env("KESTREL_MARKER", "yes");
        assert_eq!(ProcessRunner::new().run(&cmd).await.expect("run"), 0);
    }

    #[tokio::test]
    async fn test_shut_down_kills_after_grace() {
        let mut child = Command::new("/bin/sh")
            .args(["-c", "sleep 30"])
            .kill_on_drop(true)
            .spawn()
            .expect("spawn");

        let started = std::time::Instant::now();
        shut_down(&mut child, Duration::from_millis(100), "sleep").await;

        assert!(started.elapsed() < Duration::from_secs(10));
        let status = child.try_wait().expect("try_wait").expect("exited");
        assert_eq!(status.code(), None);
    }

    #[tokio::test]
    async fn test_shut_down_lets_child_finish() {
        let mut child = Command::new("/bin/sh")
            .args(["-c", "sleep 0.1; exit 3"])
            .spawn()
            .expect("spawn");

        shut_down(&mut child, Duration::from_secs(10), "sleep").await;

        let status = child.try_wait().expect("try_wait").expect("exited");
        assert_eq!(status.code(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hangup_stops_running_child() {
        let runner = ProcessRunner::new().with_grace(Duration::from_millis(100));
        let cmd = EngineCommand::new("/bin/sh", "apply", std::env::temp_dir())
            .args(["-c", "sleep 30"]);

        let sender = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let pid = std::process::id().to_string();
            tokio::process::Command::new("kill")
                .args(["-HUP", pid.as_str()])
                .status()
                .await
                .expect("kill");
        });

        let err = runner.run(&cmd).await.unwrap_err();
        sender.await.expect("sender");

        assert!(matches!(
            err,
            KestrelError::Provision(ProvisionError::Interrupted { ref action }) if action == "apply"
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let cmd = EngineCommand::new("/nonexistent/engine", "init", std::env::temp_dir());
        let err = ProcessRunner::new().run(&cmd).await.unwrap_err();

        assert!(matches!(
            err,
            KestrelError::Provision(ProvisionError::Spawn { ref action, .. }) if action == "init"
        ));
    }
}
