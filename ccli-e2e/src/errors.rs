use std::path::PathBuf;
use std::time::Duration;

use crate::cmd::CommandResult;

/// Error type for harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The executable could not be resolved or started.
    #[error("Failed to start {command}: {source}")]
    Execution {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and reported failure.
    #[error("{command} exited with {}: {}", exit_label(.result.exit_code), .result.stderr.trim())]
    NonZeroExit {
        command: String,
        result: CommandResult,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("{command} was cancelled")]
    Cancelled { command: String },

    /// A bounded wait never observed success.
    #[error("Gave up waiting for {description} after {attempts} attempts in {elapsed:?}")]
    RetryExhausted {
        description: String,
        attempts: u32,
        elapsed: Duration,
        last: Option<CommandResult>,
    },

    /// Suite setup could not locate or copy a required executable.
    #[error("Could not stage {executable}: {reason}")]
    Staging {
        executable: String,
        path: Option<PathBuf>,
        reason: String,
    },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Invalid harness configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    #[error("Container backend error: {0}")]
    Container(#[from] ccli_containers::ContainerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

impl HarnessError {
    /// The captured result attached to this error, if any.
    pub fn command_result(&self) -> Option<&CommandResult> {
        match self {
            Self::NonZeroExit { result, .. } => Some(result),
            Self::RetryExhausted { last, .. } => last.as_ref(),
            _ => None,
        }
    }

    /// Display text followed by the captured output, if any.
    pub fn diagnostic_message(&self) -> String {
        match self.command_result() {
            Some(result) => format!(
                "{self}\nstdout: {}\nstderr: {}",
                result.stdout.trim(),
                result.stderr.trim()
            ),
            None => self.to_string(),
        }
    }

    pub(crate) fn staging(
        executable: impl Into<String>,
        path: Option<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Staging {
            executable: executable.into(),
            path,
            reason: reason.into(),
        }
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
