//! Structured logging for test runs.
//!
//! Events go to the test writer in compact form and to a JSONL file under
//! `target/test-logs/`.

use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

/// Overrides the JSONL log path.
pub const LOG_FILE_ENV: &str = "CCLI_TEST_LOG_FILE";

/// Log level for harness targets (default `info`).
pub const LOG_LEVEL_ENV: &str = "CCLI_TEST_LOG_LEVEL";

/// Targets enabled at the harness level. `test` is the target test bodies
/// log under.
const HARNESS_TARGETS: [&str; 3] = ["ccli_e2e", "ccli_containers", "test"];

static LOGGING_INIT: Once = Once::new();

/// Install the test subscriber. Later calls are no-ops.
pub fn init_test_logging() {
    LOGGING_INIT.call_once(|| {
        let file_layer = create_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
        let extra = std::env::var(EnvFilter::DEFAULT_ENV).ok();

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&level, extra.as_deref()))
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Filter enabling the harness targets at `level`, plus any `RUST_LOG`
/// style directives in `extra`. Unparseable input falls back to `info` for
/// the harness targets alone.
pub(crate) fn env_filter(level: &str, extra: Option<&str>) -> EnvFilter {
    let mut directives: Vec<String> = HARNESS_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    if let Some(extra) = extra.map(str::trim).filter(|extra| !extra.is_empty()) {
        directives.push(extra.to_string());
    }
    match EnvFilter::try_new(directives.join(",")) {
        Ok(filter) => filter,
        Err(_) if level != "info" || extra.is_some() => env_filter("info", None),
        Err(_) => EnvFilter::new("info"),
    }
}

fn create_log_file() -> Option<std::fs::File> {
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::File::create(path).ok()
}

/// Where the JSONL log is written.
pub fn log_file_path() -> PathBuf {
    match std::env::var(LOG_FILE_ENV) {
        Ok(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => find_target_dir().join("test-logs").join("e2e.jsonl"),
    }
}

fn find_target_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }
    crate::config::workspace_root()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
        .join("target")
}

/// Stage of a test run, recorded as the `phase` field on lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Test,
    Teardown,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Test => "test",
            Self::Teardown => "teardown",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
