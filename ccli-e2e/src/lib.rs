//! End-to-end harness for the ccli container CLI.
//!
//! Stages the current and classic CLI binaries, runs them as external
//! processes with bounded retries and per-test config isolation, and dumps
//! diagnostics when a test fails.

pub mod cmd;
pub mod config;
pub mod containers;
pub mod diagnostics;
pub mod errors;
pub mod health;
pub mod logging;
pub mod platform;
pub mod retry;
pub mod suite;

pub use ccli_containers as backend;
pub use cmd::{CmdContext, CommandResult, RunningCommand};
pub use config::{EnvParser, SuiteConfig};
pub use diagnostics::{
    CollectingFailHandler, DumpFailHandler, FailHandler, FailureReport, FailureSink,
};
pub use errors::{HarnessError, HarnessResult};
pub use logging::init_test_logging;
pub use retry::{Boundary, DEFAULT_RETRY_INTERVAL, Probe, RetryOutcome, RetryPolicy, wait_for};
pub use suite::{Suite, TestContext};
pub use tokio_util::sync::CancellationToken;
