//! Failure reporting for tests.
//!
//! Every failure is routed through a [`FailHandler`] together with a
//! [`FailureReport`] describing the state of the test's config directory.

use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::errors::HarnessError;

/// Snapshot captured when a test fails.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub test_name: String,
    pub message: String,
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    /// Contents of the config file, or why it could not be read.
    pub config_contents: Result<String, String>,
    /// Every path under the config directory, the directory itself first.
    pub listing: Vec<PathBuf>,
    pub captured_at: DateTime<Utc>,
}

impl FailureReport {
    pub fn capture(
        test_name: &str,
        message: &str,
        config_dir: &Path,
        config_file_name: &str,
    ) -> Self {
        let config_file = config_dir.join(config_file_name);
        let config_contents = std::fs::read_to_string(&config_file).map_err(|e| e.to_string());
        Self {
            test_name: test_name.to_string(),
            message: message.to_string(),
            config_dir: config_dir.to_path_buf(),
            config_file,
            config_contents,
            listing: dir_listing(config_dir),
            captured_at: Utc::now(),
        }
    }

    /// Human-readable dump of the report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Test {} failed: {}", self.test_name, self.message);
        let _ = writeln!(out, "Contents of {}:", self.config_file.display());
        match &self.config_contents {
            Ok(contents) => {
                let _ = writeln!(out, "{contents}");
            }
            Err(reason) => {
                let _ = writeln!(out, "<unreadable: {reason}>");
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Contents of config dir:");
        for path in &self.listing {
            let _ = writeln!(out, "{}", path.display());
        }
        out
    }
}

/// All entries under `dir`, sorted by name within each directory.
pub fn dir_listing(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.into_path()),
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .collect()
}

/// Receives each test failure.
pub trait FailHandler: Send + Sync {
    fn handle(&self, report: &FailureReport);
}

impl<F> FailHandler for F
where
    F: Fn(&FailureReport) + Send + Sync,
{
    fn handle(&self, report: &FailureReport) {
        self(report)
    }
}

/// Logs the failure and prints the config dump to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct DumpFailHandler;

impl FailHandler for DumpFailHandler {
    fn handle(&self, report: &FailureReport) {
        error!(
            test = %report.test_name,
            config_dir = %report.config_dir.display(),
            "{}", report.message
        );
        eprintln!("{}", report.render());
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct CollectingFailHandler {
    reports: Mutex<Vec<FailureReport>>,
}

impl CollectingFailHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl FailHandler for CollectingFailHandler {
    fn handle(&self, report: &FailureReport) {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(report.clone());
    }
}

/// Per-test route from a failure to the suite's [`FailHandler`].
#[derive(Clone)]
pub struct FailureSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    test_name: String,
    config_dir: PathBuf,
    config_file_name: String,
    handler: Arc<dyn FailHandler>,
    failures: AtomicU32,
}

impl FailureSink {
    pub(crate) fn new(
        test_name: &str,
        config_dir: &Path,
        config_file_name: &str,
        handler: Arc<dyn FailHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                test_name: test_name.to_string(),
                config_dir: config_dir.to_path_buf(),
                config_file_name: config_file_name.to_string(),
                handler,
                failures: AtomicU32::new(0),
            }),
        }
    }

    /// Mark the test failed, dump diagnostics, and return the error to
    /// propagate.
    pub fn fail(&self, message: &str) -> HarnessError {
        self.inner.failures.fetch_add(1, Ordering::SeqCst);
        let report = FailureReport::capture(
            &self.inner.test_name,
            message,
            &self.inner.config_dir,
            &self.inner.config_file_name,
        );
        self.inner.handler.handle(&report);
        HarnessError::AssertionFailed(message.to_string())
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    pub fn has_failed(&self) -> bool {
        self.failure_count() > 0
    }
}

impl fmt::Debug for FailureSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureSink")
            .field("test_name", &self.inner.test_name)
            .field("config_dir", &self.inner.config_dir)
            .field("failures", &self.failure_count())
            .finish_non_exhaustive()
    }
}
