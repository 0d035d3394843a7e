//! Test Suite Lifecycle.
//!
//! [`Suite::setup`] stages the classic and current CLI binaries into a
//! private directory placed first on the search path of every command the
//! suite builds. Each test gets a [`TestContext`] with its own config
//! directory, threaded to commands through the config environment variable.
//! Both directories are removed when their owner is dropped.

use std::any::Any;
use std::ffi::OsString;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::cmd::{CmdContext, CommandResult};
use crate::config::SuiteConfig;
use crate::diagnostics::{DumpFailHandler, FailHandler, FailureSink, dir_listing};
use crate::errors::{HarnessError, HarnessResult};
use crate::logging::Phase;
use crate::platform::{executable_name, list_processes_program};

struct SuiteShared {
    config: SuiteConfig,
    staging: TempDir,
    search_path: OsString,
    staged: Vec<PathBuf>,
    handler: Arc<dyn FailHandler>,
}

/// A set of end-to-end tests sharing one pair of staged binaries.
pub struct Suite {
    shared: Arc<SuiteShared>,
}

impl Suite {
    /// Stage binaries and prepare the search path.
    ///
    /// Fails with [`HarnessError::Staging`] when either binary cannot be
    /// found, read or copied; no test can run in that case.
    pub fn setup(config: SuiteConfig, handler: Arc<dyn FailHandler>) -> HarnessResult<Self> {
        std::fs::create_dir_all(&config.temp_root)?;
        let staging = tempfile::Builder::new()
            .prefix("ccli-e2e-bin-")
            .tempdir_in(&config.temp_root)?;
        info!(
            phase = %Phase::Setup,
            staging_dir = %staging.path().display(),
            "Staging binaries"
        );

        let classic_src = locate_classic(&config)?;
        let classic_dst = staging.path().join(executable_name(&config.classic_name));
        copy_executable(&config.classic_name, &classic_src, &classic_dst)?;

        let current_dst = staging.path().join(executable_name(&config.cli_name));
        copy_executable(&config.cli_name, &config.cli_binary, &current_dst)?;

        let search_path = prepend_path(staging.path(), config.host_path.as_deref())?;
        info!(
            phase = %Phase::Setup,
            classic = %classic_src.display(),
            current = %config.cli_binary.display(),
            "Suite ready"
        );

        Ok(Self {
            shared: Arc::new(SuiteShared {
                config,
                staging,
                search_path,
                staged: vec![classic_dst, current_dst],
                handler,
            }),
        })
    }

    /// [`setup`](Self::setup) with configuration from the environment and
    /// failures dumped to stderr.
    pub fn from_env() -> HarnessResult<Self> {
        Self::setup(SuiteConfig::from_env()?, Arc::new(DumpFailHandler))
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.shared.config
    }

    pub fn staging_dir(&self) -> &Path {
        self.shared.staging.path()
    }

    /// Paths of the staged classic and current binaries, in that order.
    pub fn staged(&self) -> &[PathBuf] {
        &self.shared.staged
    }

    /// Files actually present in the staging directory.
    pub fn staged_executables(&self) -> Vec<PathBuf> {
        dir_listing(self.staging_dir())
            .into_iter()
            .filter(|path| path.is_file())
            .collect()
    }

    /// Search path given to commands: staging first, then the host path.
    pub fn search_path(&self) -> &OsString {
        &self.shared.search_path
    }

    /// Where `name` resolves on the suite's search path.
    pub fn resolve(&self, name: &str) -> HarnessResult<PathBuf> {
        CmdContext::new(name, Vec::<String>::new())
            .with_search_path(self.shared.search_path.clone())
            .resolve_program()
    }

    /// A command resolved against the staging directory first. It carries
    /// no config directory; use [`TestContext::new_command`] inside tests.
    pub fn new_command<I, S>(&self, command: impl Into<String>, args: I) -> CmdContext
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.command(command, args)
    }

    /// Open a test. Its config directory lives until the context is dropped.
    pub fn begin_test(&self, name: &str) -> HarnessResult<TestContext> {
        let config = &self.shared.config;
        let config_dir = tempfile::Builder::new()
            .prefix("ccli-e2e-config-")
            .tempdir_in(&config.temp_root)?;
        let sink = FailureSink::new(
            name,
            config_dir.path(),
            &config.config_file_name,
            Arc::clone(&self.shared.handler),
        );
        info!(
            phase = %Phase::Test,
            test = name,
            config_dir = %config_dir.path().display(),
            "Test started"
        );

        Ok(TestContext {
            inner: Arc::new(TestInner {
                name: name.to_string(),
                config_path: config_dir.path().to_path_buf(),
                config_dir: Mutex::new(Some(config_dir)),
                suite: Arc::clone(&self.shared),
                sink,
            }),
        })
    }

    /// Run `body` as a named test.
    ///
    /// An error returned by the body that was not already reported is
    /// routed through the fail handler, so every failing test is dumped
    /// exactly once. A panicking body is dumped the same way and the panic
    /// is resumed. The config directory is removed afterwards.
    pub async fn run<F, Fut>(&self, name: &str, body: F) -> HarnessResult<()>
    where
        F: FnOnce(TestContext) -> Fut,
        Fut: Future<Output = HarnessResult<()>>,
    {
        let ctx = self.begin_test(name)?;
        let outcome = match AssertUnwindSafe(body(ctx.clone())).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                if !ctx.failed() {
                    ctx.fail(format!("panicked: {}", panic_message(payload.as_ref())));
                }
                info!(phase = %Phase::Test, test = name, passed = false, "Test panicked");
                ctx.finish();
                std::panic::resume_unwind(payload);
            }
        };
        let outcome = match outcome {
            Err(err) if !ctx.failed() => Err(ctx.fail(err.diagnostic_message())),
            other => other,
        };
        info!(
            phase = %Phase::Test,
            test = name,
            passed = outcome.is_ok(),
            "Test finished"
        );
        ctx.finish();
        outcome
    }

    /// Remove the staging directory now, reporting any error.
    ///
    /// Tests still holding a context keep the directory alive; it is then
    /// removed when the last of them is dropped.
    pub fn teardown(self) -> HarnessResult<()> {
        info!(phase = %Phase::Teardown, "Suite teardown");
        match Arc::try_unwrap(self.shared) {
            Ok(shared) => shared.staging.close().map_err(HarnessError::from),
            Err(_) => {
                warn!(phase = %Phase::Teardown, "Tests still running; deferring cleanup");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suite")
            .field("staging_dir", &self.staging_dir())
            .field("staged", &self.shared.staged)
            .finish_non_exhaustive()
    }
}

impl SuiteShared {
    fn command<I, S>(&self, command: impl Into<String>, args: I) -> CmdContext
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CmdContext::new(command, args)
            .with_search_path(self.search_path.clone())
            .with_timeout(self.config.command_timeout)
            .every(self.config.retry_interval)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn locate_classic(config: &SuiteConfig) -> HarnessResult<PathBuf> {
    if let Some(path) = &config.classic_binary {
        return Ok(path.clone());
    }
    let cwd = config.temp_root.clone();
    let lookup = |name: &str| which::which_in(executable_name(name), config.host_path.clone(), &cwd);

    match lookup(&config.classic_name) {
        Ok(path) => Ok(path),
        Err(classic_err) => {
            debug!(
                name = %config.classic_name,
                error = %classic_err,
                "Classic CLI not on PATH, falling back to current name"
            );
            lookup(&config.cli_name).map_err(|e| {
                HarnessError::staging(
                    &config.classic_name,
                    None,
                    format!("neither {} nor {} found on PATH: {e}", config.classic_name, config.cli_name),
                )
            })
        }
    }
}

fn copy_executable(name: &str, src: &Path, dst: &Path) -> HarnessResult<()> {
    if !src.is_file() {
        return Err(HarnessError::staging(
            name,
            Some(src.to_path_buf()),
            format!("{} is not a file", src.display()),
        ));
    }
    // fs::copy carries the permission bits over.
    std::fs::copy(src, dst).map_err(|e| {
        HarnessError::staging(
            name,
            Some(src.to_path_buf()),
            format!("copy to {} failed: {e}", dst.display()),
        )
    })?;
    debug!(name, src = %src.display(), dst = %dst.display(), "Staged executable");
    Ok(())
}

fn prepend_path(dir: &Path, rest: Option<&std::ffi::OsStr>) -> HarnessResult<OsString> {
    let mut entries = vec![dir.to_path_buf()];
    if let Some(rest) = rest {
        entries.extend(std::env::split_paths(rest));
    }
    std::env::join_paths(entries)
        .map_err(|e| HarnessError::staging("PATH", Some(dir.to_path_buf()), e.to_string()))
}

struct TestInner {
    name: String,
    config_path: PathBuf,
    config_dir: Mutex<Option<TempDir>>,
    suite: Arc<SuiteShared>,
    sink: FailureSink,
}

impl TestInner {
    fn remove_config_dir(&self) {
        let dir = self
            .config_dir
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(dir) = dir {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(test = %self.name, path = %path.display(), "Removed config dir"),
                Err(e) => warn!(test = %self.name, path = %path.display(), error = %e, "Failed to remove config dir"),
            }
        }
    }
}

impl Drop for TestInner {
    fn drop(&mut self) {
        self.remove_config_dir();
    }
}

/// Handle to one running test.
///
/// Clones share the test; each command it builds points the CLI at the
/// test's config directory.
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<TestInner>,
}

impl TestContext {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Directory the CLI under test uses for configuration.
    pub fn config_dir(&self) -> &Path {
        &self.inner.config_path
    }

    pub fn config_file(&self) -> PathBuf {
        self.inner
            .config_path
            .join(&self.inner.suite.config.config_file_name)
    }

    /// Write raw contents to the config file.
    pub fn write_config(&self, contents: &str) -> HarnessResult<PathBuf> {
        let path = self.config_file();
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Serialize `value` as pretty JSON into the config file.
    pub fn write_config_json<T: Serialize>(&self, value: &T) -> HarnessResult<PathBuf> {
        let contents = serde_json::to_string_pretty(value)
            .map_err(|e| HarnessError::Io(std::io::Error::other(e)))?;
        self.write_config(&contents)
    }

    /// A command with the test's config directory and failure reporting.
    pub fn new_command<I, S>(&self, command: impl Into<String>, args: I) -> CmdContext
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .suite
            .command(command, args)
            .with_env(
                self.inner.suite.config.config_env_var.clone(),
                self.inner.config_path.clone(),
            )
            .with_failure_sink(self.inner.sink.clone())
    }

    /// The current CLI.
    pub fn new_cli_command<I, S>(&self, args: I) -> CmdContext
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.new_command(self.inner.suite.config.cli_name.clone(), args)
    }

    /// The classic CLI.
    pub fn new_classic_command<I, S>(&self, args: I) -> CmdContext
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.new_command(self.inner.suite.config.classic_name.clone(), args)
    }

    /// The host's process listing utility.
    pub fn list_processes_command(&self) -> CmdContext {
        self.new_command(list_processes_program(), Vec::<String>::new())
    }

    /// Report a failure and return the error to propagate.
    pub fn fail(&self, message: impl AsRef<str>) -> HarnessError {
        self.inner.sink.fail(message.as_ref())
    }

    pub fn failed(&self) -> bool {
        self.inner.sink.has_failed()
    }

    /// Pass `result` through, reporting an error that was not yet reported.
    pub fn check<T>(&self, result: HarnessResult<T>) -> HarnessResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err @ HarnessError::AssertionFailed(_)) => Err(err),
            Err(err) => Err(self.fail(err.diagnostic_message())),
        }
    }

    pub fn assert(&self, condition: bool, message: impl AsRef<str>) -> HarnessResult<()> {
        if condition {
            Ok(())
        } else {
            Err(self.fail(message))
        }
    }

    pub fn assert_success(&self, result: &CommandResult, context: &str) -> HarnessResult<()> {
        self.assert(
            result.success(),
            format!(
                "{context}: expected success, got {:?}\nstdout: {}\nstderr: {}",
                result.exit_code,
                result.stdout.trim(),
                result.stderr.trim()
            ),
        )
    }

    pub fn assert_stdout_contains(
        &self,
        result: &CommandResult,
        pattern: &str,
        context: &str,
    ) -> HarnessResult<()> {
        self.assert(
            result.stdout_contains(pattern),
            format!("{context}: stdout does not contain {pattern:?}\nstdout: {}", result.stdout),
        )
    }

    /// Remove the config directory now.
    pub fn finish(self) {
        self.inner.remove_config_dir();
    }
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("name", &self.inner.name)
            .field("config_dir", &self.inner.config_path)
            .finish_non_exhaustive()
    }
}
