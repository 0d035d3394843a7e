//! Command Context: one prepared invocation of an external executable.
//!
//! A [`CmdContext`] is built with consuming builder methods and is never
//! modified afterwards; every call to [`CmdContext::execute`] spawns a fresh
//! process and yields a fresh [`CommandResult`].

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::diagnostics::FailureSink;
use crate::errors::{HarnessError, HarnessResult};
use crate::retry::{Probe, RetryPolicy};

/// Result of a command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandResult {
    /// Check if the command succeeded (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Check if stdout contains a pattern
    pub fn stdout_contains(&self, pattern: &str) -> bool {
        self.stdout.contains(pattern)
    }

    /// Check if stderr contains a pattern
    pub fn stderr_contains(&self, pattern: &str) -> bool {
        self.stderr.contains(pattern)
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Non-empty stdout lines with surrounding whitespace removed.
    pub fn stdout_lines(&self) -> Vec<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }
}

/// A prepared invocation of one external executable.
#[derive(Debug, Clone)]
pub struct CmdContext {
    command: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    envs: Vec<(String, OsString)>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    retries: RetryPolicy,
    search_path: Option<OsString>,
    failure: Option<FailureSink>,
}

impl CmdContext {
    /// Create an invocation of `command` with `args`. Nothing runs yet.
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            dir: None,
            envs: Vec::new(),
            stdin: None,
            timeout: None,
            retries: RetryPolicy::default(),
            search_path: None,
            failure: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the process with `dir` as its working directory.
    pub fn within_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        let key = key.into();
        self.envs.retain(|(existing, _)| *existing != key);
        self.envs.push((key, value.into()));
        self
    }

    pub fn with_envs<I, K, V>(self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<OsString>,
    {
        envs.into_iter()
            .fold(self, |cmd, (key, value)| cmd.with_env(key, value))
    }

    /// Feed `data` to the process's stdin.
    pub fn with_stdin_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Kill the process if one attempt runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry a failing [`exec`](Self::exec) up to `count` more times.
    pub fn with_retries(mut self, count: u32) -> Self {
        self.retries = self.retries.with_max_attempts(count.saturating_add(1));
        self
    }

    /// Wait `interval` between retried attempts.
    pub fn every(mut self, interval: Duration) -> Self {
        self.retries.interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retries = policy;
        self
    }

    /// Resolve the program on `path` and pass it to the child as `PATH`.
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub(crate) fn with_failure_sink(mut self, sink: FailureSink) -> Self {
        self.failure = Some(sink);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retries
    }

    /// Value of an environment override, if set.
    pub fn env_value(&self, key: &str) -> Option<&OsString> {
        self.envs
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Human-readable command line used in logs and errors.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }

    /// Absolute path of the executable this context would start.
    pub fn resolve_program(&self) -> HarnessResult<PathBuf> {
        let candidate = Path::new(&self.command);
        if candidate.is_absolute() || candidate.components().count() > 1 {
            return Ok(candidate.to_path_buf());
        }

        let search = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"));
        let cwd = match &self.dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        which::which_in(&self.command, search, cwd).map_err(|e| HarnessError::Execution {
            command: self.command_line(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, e),
        })
    }

    fn build(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        if let Some(path) = &self.search_path {
            cmd.env("PATH", path);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    fn spawn_child(&self) -> HarnessResult<Child> {
        let program = self.resolve_program()?;
        debug!(
            command = %self.command_line(),
            program = %program.display(),
            "Executing"
        );
        self.build(&program)
            .spawn()
            .map_err(|source| HarnessError::Execution {
                command: self.command_line(),
                source,
            })
    }

    /// Run one attempt to completion and capture its output, whatever the
    /// exit status.
    pub async fn output(&self, cancel: &CancellationToken) -> HarnessResult<CommandResult> {
        if cancel.is_cancelled() {
            return Err(HarnessError::Cancelled {
                command: self.command_line(),
            });
        }

        let start = Instant::now();
        let mut child = self.spawn_child()?;

        let stdin = child.stdin.take();
        let data = self.stdin.as_deref();
        let feed = async move {
            if let (Some(mut stdin), Some(data)) = (stdin, data) {
                // A process may exit without draining its stdin.
                if let Err(e) = stdin.write_all(data).await {
                    debug!(error = %e, "Stdin closed before all data was written");
                }
            }
        };
        let run = async move {
            let (_, output) = tokio::join!(feed, child.wait_with_output());
            output
        };
        let expire = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Dropping `run` drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(command = %self.command_line(), "Command cancelled");
                return Err(HarnessError::Cancelled { command: self.command_line() });
            }
            _ = expire => {
                let timeout = self.timeout.unwrap_or_default();
                warn!(command = %self.command_line(), ?timeout, "Command timed out");
                return Err(HarnessError::Timeout { command: self.command_line(), timeout });
            }
            output = run => output?,
        };

        let result = CommandResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        };

        debug!(
            command = %self.command_line(),
            exit_code = ?result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "Command completed"
        );
        for line in result.stdout.lines() {
            trace!(target: "ccli_e2e::stdout", program = %self.command, "{line}");
        }
        for line in result.stderr.lines() {
            trace!(target: "ccli_e2e::stderr", program = %self.command, "{line}");
        }

        Ok(result)
    }

    /// Run one attempt; a failing exit status is a [`HarnessError::NonZeroExit`].
    pub async fn execute(&self, cancel: &CancellationToken) -> HarnessResult<CommandResult> {
        let result = self.output(cancel).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(HarnessError::NonZeroExit {
                command: self.command_line(),
                result,
            })
        }
    }

    /// Run with the attached retry policy and return stdout.
    ///
    /// Non-zero exits and timeouts are retried; a process that cannot be
    /// started is not.
    pub async fn exec(&self, cancel: &CancellationToken) -> HarnessResult<String> {
        if self.retries.is_single_attempt() {
            return self.execute(cancel).await.map(|result| result.stdout);
        }

        let outcome = self
            .retries
            .eval(&self.command_line(), cancel, |_| async move {
                match self.execute(cancel).await {
                    Ok(result) => Ok(Probe::Ready(result.stdout)),
                    Err(HarnessError::NonZeroExit { result, .. }) => Ok(Probe::observed(result)),
                    Err(HarnessError::Timeout { .. }) => Ok(Probe::pending()),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(outcome.value)
    }

    /// [`exec`](Self::exec), reporting any error as a test failure.
    pub async fn exec_or_fail(&self, cancel: &CancellationToken) -> HarnessResult<String> {
        match self.exec(cancel).await {
            Ok(stdout) => {
                debug!(command = %self.command_line(), stdout = %stdout.trim_end(), "exec ok");
                Ok(stdout)
            }
            Err(err) => Err(self.report_failure(&err)),
        }
    }

    /// Re-run the command until `check` accepts its result.
    ///
    /// Exit status is not interpreted; `check` decides. Exhaustion carries
    /// the last observed result.
    pub async fn retry_until<F>(
        &self,
        cancel: &CancellationToken,
        check: F,
    ) -> HarnessResult<CommandResult>
    where
        F: FnMut(&CommandResult) -> bool,
    {
        let check = Mutex::new(check);
        let accepts = |result: &CommandResult| {
            let mut check = check.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            (*check)(result)
        };
        let outcome = self
            .retries
            .eval(&self.command_line(), cancel, |_| {
                let accepts = &accepts;
                async move {
                    match self.output(cancel).await {
                        Ok(result) if accepts(&result) => Ok(Probe::Ready(result)),
                        Ok(result) => Ok(Probe::observed(result)),
                        Err(HarnessError::Timeout { .. }) => Ok(Probe::pending()),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(outcome.value)
    }

    /// [`retry_until`](Self::retry_until), reporting exhaustion as a test
    /// failure.
    pub async fn retry_until_or_fail<F>(
        &self,
        cancel: &CancellationToken,
        check: F,
    ) -> HarnessResult<CommandResult>
    where
        F: FnMut(&CommandResult) -> bool,
    {
        match self.retry_until(cancel, check).await {
            Ok(result) => Ok(result),
            Err(err) => Err(self.report_failure(&err)),
        }
    }

    /// Start the process without waiting for it.
    pub fn spawn(&self) -> HarnessResult<RunningCommand> {
        let mut child = self.spawn_child()?;
        if let (Some(mut stdin), Some(data)) = (child.stdin.take(), self.stdin.clone()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&data).await {
                    debug!(error = %e, "Stdin closed before all data was written");
                }
            });
        }
        Ok(RunningCommand {
            command: self.command_line(),
            started_at: Instant::now(),
            child,
        })
    }

    fn report_failure(&self, err: &HarnessError) -> HarnessError {
        if let HarnessError::AssertionFailed(message) = err {
            return HarnessError::AssertionFailed(message.clone());
        }
        let message = err.diagnostic_message();
        match &self.failure {
            Some(sink) => sink.fail(&message),
            None => {
                tracing::error!(command = %self.command_line(), "{message}");
                HarnessError::AssertionFailed(message)
            }
        }
    }
}

impl fmt::Display for CmdContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// A process started with [`CmdContext::spawn`].
///
/// Stdout and stderr are piped; a caller that lets the process produce a
/// lot of output must drain them. The process is killed when the handle is
/// dropped.
#[derive(Debug)]
pub struct RunningCommand {
    command: String,
    started_at: Instant,
    child: Child,
}

impl RunningCommand {
    pub fn command_line(&self) -> &str {
        &self.command
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Take stdout for reading (can only be called once)
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take stderr for reading (can only be called once)
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Kill the process and reap it.
    pub async fn kill(&mut self) -> HarnessResult<()> {
        debug!(command = %self.command, pid = ?self.child.id(), "Killing process");
        self.child.kill().await?;
        Ok(())
    }

    /// Wait for the process to exit and collect whatever output was not
    /// taken. Cancellation kills the process.
    pub async fn wait(self, cancel: &CancellationToken) -> HarnessResult<CommandResult> {
        let Self {
            command,
            started_at,
            child,
        } = self;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HarnessError::Cancelled { command }),
            output = child.wait_with_output() => output?,
        };
        Ok(CommandResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started_at.elapsed(),
        })
    }
}
