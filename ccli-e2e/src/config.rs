//! Suite configuration and its environment overrides.
//!
//! All variables share the `CCLI_E2E_` prefix. Parsing collects every
//! problem so a misconfigured run reports them all at once.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::errors::{HarnessError, HarnessResult};
use crate::platform::{CLASSIC_CLI_NAME, CLI_NAME, executable_name};
use crate::retry::DEFAULT_RETRY_INTERVAL;

/// Prefix shared by every harness variable.
pub const ENV_PREFIX: &str = "CCLI_E2E_";

/// Variable through which the CLI locates its config directory.
pub const DEFAULT_CONFIG_ENV_VAR: &str = "DOCKER_CONFIG";

pub const DEFAULT_CONFIG_FILE_NAME: &str = "config.json";

/// Per-attempt timeout applied to suite-built commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Path not found for {var}: {path}")]
    PathNotFound { var: String, path: PathBuf },
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    lookup: Lookup,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser over the process environment.
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
    }

    /// Parser over an arbitrary variable source.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            prefix: ENV_PREFIX,
            lookup: Box::new(lookup),
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Unprefixed lookup, for variables like `PATH`.
    pub fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    /// A non-empty prefixed value, if set.
    pub fn get_string(&self, name: &str) -> Option<String> {
        (self.lookup)(&self.var_name(name)).filter(|value| !value.trim().is_empty())
    }

    pub fn get_string_or(&self, name: &str, default: &str) -> String {
        self.get_string(name)
            .unwrap_or_else(|| default.to_string())
    }

    /// A path value that must exist when set.
    pub fn get_existing_path(&mut self, name: &str) -> Option<PathBuf> {
        let var = self.var_name(name);
        let path = PathBuf::from(self.get_string(name)?);
        if path.exists() {
            Some(path)
        } else {
            self.errors.push(EnvError::PathNotFound { var, path });
            None
        }
    }

    /// Get a u64 value with default and range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> u64 {
        let var = self.var_name(name);
        let Some(value) = self.get_string(name) else {
            return default;
        };
        match value.trim().parse::<u64>() {
            Ok(n) if (min..=max).contains(&n) => n,
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: n,
                    min,
                    max,
                });
                default
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "unsigned integer".to_string(),
                    value,
                });
                default
            }
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the suite needs to stage binaries and build commands.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    /// Base name of the CLI under test.
    pub cli_name: String,
    /// Base name of the classic CLI.
    pub classic_name: String,
    /// Build output of the CLI under test.
    pub cli_binary: PathBuf,
    /// Explicit classic binary; looked up on `host_path` when unset.
    pub classic_binary: Option<PathBuf>,
    /// Search path used to locate host executables.
    pub host_path: Option<OsString>,
    pub config_env_var: String,
    pub config_file_name: String,
    pub command_timeout: Duration,
    pub retry_interval: Duration,
    /// Parent of the staging and per-test config directories.
    pub temp_root: PathBuf,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        let root = workspace_root().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cli_name: CLI_NAME.to_string(),
            classic_name: CLASSIC_CLI_NAME.to_string(),
            cli_binary: root.join("bin").join(executable_name(CLI_NAME)),
            classic_binary: None,
            host_path: std::env::var_os("PATH"),
            config_env_var: DEFAULT_CONFIG_ENV_VAR.to_string(),
            config_file_name: DEFAULT_CONFIG_FILE_NAME.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            temp_root: std::env::temp_dir(),
        }
    }
}

impl SuiteConfig {
    /// Defaults overridden by `CCLI_E2E_*` variables.
    pub fn from_env() -> HarnessResult<Self> {
        Self::from_parser(EnvParser::new())
    }

    pub fn from_parser(mut parser: EnvParser) -> HarnessResult<Self> {
        let mut config = Self::default();

        config.cli_name = parser.get_string_or("CLI_NAME", &config.cli_name);
        config.classic_name = parser.get_string_or("CLASSIC_NAME", &config.classic_name);
        if parser.get_string("CLI_NAME").is_some() {
            let root = workspace_root().unwrap_or_else(|| PathBuf::from("."));
            config.cli_binary = root.join("bin").join(executable_name(&config.cli_name));
        }
        if let Some(path) = parser.get_existing_path("CLI_BINARY") {
            config.cli_binary = path;
        }
        config.classic_binary = parser.get_existing_path("CLASSIC_BINARY");
        config.host_path = parser.raw("PATH").map(OsString::from);
        config.config_env_var = parser.get_string_or("CONFIG_ENV", &config.config_env_var);

        let timeout = parser.get_u64_range(
            "TIMEOUT_SECS",
            DEFAULT_COMMAND_TIMEOUT.as_secs(),
            1,
            3600,
        );
        config.command_timeout = Duration::from_secs(timeout);

        let interval = parser.get_u64_range(
            "RETRY_INTERVAL_MS",
            DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            1,
            60_000,
        );
        config.retry_interval = Duration::from_millis(interval);

        if let Some(dir) = parser.get_existing_path("TEMP_DIR") {
            config.temp_root = dir;
        }

        if parser.has_errors() {
            let problems = parser
                .take_errors()
                .iter()
                .map(ToString::to_string)
                .collect();
            return Err(HarnessError::Config(problems));
        }
        Ok(config)
    }

    pub fn with_cli_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.cli_binary = path.into();
        self
    }

    pub fn with_classic_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.classic_binary = Some(path.into());
        self
    }

    pub fn with_host_path(mut self, path: impl Into<OsString>) -> Self {
        self.host_path = Some(path.into());
        self
    }

    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = dir.into();
        self
    }

    pub fn with_config_env_var(mut self, var: impl Into<String>) -> Self {
        self.config_env_var = var.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// Root of the cargo workspace the tests run in.
pub fn workspace_root() -> Option<PathBuf> {
    let start = std::env::var_os("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")));
    find_workspace_root(&start)
}

/// Walk up from `start` to the first `Cargo.toml` declaring `[workspace]`.
fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| {
            std::fs::read_to_string(dir.join("Cargo.toml"))
                .map(|contents| contents.contains("[workspace]"))
                .unwrap_or(false)
        })
        .map(Path::to_path_buf)
}
