use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ccli_e2e::SuiteConfig;
use tempfile::TempDir;

/// Current CLI stand-in. Prints the path it runs from so tests can tell a
/// staged copy from the build output.
const CURRENT_SCRIPT: &str = r#"#!/bin/sh
case "$1" in
  version) echo "ccli 0.3.0 $0" ;;
  config) cat "$DOCKER_CONFIG/config.json" ;;
  fail)
    echo attempt >> "$DOCKER_CONFIG/attempts"
    echo "simulated failure" >&2
    exit 1
    ;;
  sleep) sleep "$2" ;;
  *) echo "unknown command: $1" >&2; exit 2 ;;
esac
"#;

const CLASSIC_SCRIPT: &str = r#"#!/bin/sh
case "$1" in
  version) echo "classic 19.03 $0" ;;
  *) echo "classic: unknown command: $1" >&2; exit 2 ;;
esac
"#;

/// Fake CLI binaries plus a scratch root for suite directories.
pub struct FakeCli {
    pub bin: TempDir,
    pub temp: TempDir,
}

impl FakeCli {
    pub fn new() -> Self {
        crate::test_log!("FIXTURE: Creating fake CLI binaries");

        let fake = Self {
            bin: TempDir::new().expect("Failed to create bin dir"),
            temp: TempDir::new().expect("Failed to create temp root"),
        };
        fake.install("docker", CURRENT_SCRIPT);
        fake.install("docker-classic", CLASSIC_SCRIPT);
        fake
    }

    pub fn install(&self, name: &str, script: &str) -> PathBuf {
        write_script(self.bin.path(), name, script)
    }

    pub fn config(&self) -> SuiteConfig {
        SuiteConfig::default()
            .with_cli_binary(self.bin.path().join("docker"))
            .with_classic_binary(self.bin.path().join("docker-classic"))
            .with_temp_root(self.temp.path())
            .with_retry_interval(Duration::from_millis(10))
    }
}

pub fn write_script(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).expect("Failed to write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .expect("Failed to make script executable");
    path
}
