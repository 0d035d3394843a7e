use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ccli_e2e::{CancellationToken, CollectingFailHandler, HarnessError, RetryPolicy, Suite};
use futures::FutureExt;

use crate::common::fixtures::write_script;
use crate::common::{FakeCli, assert_contains, assert_path_missing};

#[test]
fn test_setup_stages_exactly_two_executables() {
    crate::test_log!("TEST START: test_setup_stages_exactly_two_executables");
    let fake = FakeCli::new();
    let suite = Suite::setup(fake.config(), Arc::new(CollectingFailHandler::new())).unwrap();

    let names: Vec<_> = suite
        .staged_executables()
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(names, vec!["docker", "docker-classic"]);
    crate::test_log!("TEST PASS: test_setup_stages_exactly_two_executables");
}

#[tokio::test]
async fn test_staged_binary_shadows_host_path() {
    let fake = FakeCli::new();
    let host = tempfile::tempdir().unwrap();
    write_script(host.path(), "docker", "#!/bin/sh\necho host docker\n");
    let config = fake.config().with_host_path(host.path());
    let suite = Suite::setup(config, Arc::new(CollectingFailHandler::new())).unwrap();

    assert_eq!(
        suite.resolve("docker").unwrap(),
        suite.staging_dir().join("docker")
    );

    let ctx = suite.begin_test("shadow").unwrap();
    let stdout = ctx
        .new_cli_command(["version"])
        .exec(&CancellationToken::new())
        .await
        .unwrap();
    assert_contains(&stdout, "ccli 0.3.0");
    assert_contains(&stdout, &suite.staging_dir().display().to_string());
}

#[tokio::test]
async fn test_classic_and_current_are_distinct() {
    let fake = FakeCli::new();
    let suite = Suite::setup(fake.config(), Arc::new(CollectingFailHandler::new())).unwrap();
    let ctx = suite.begin_test("classic_vs_current").unwrap();
    let cancel = CancellationToken::new();

    let current = ctx.new_cli_command(["version"]).exec(&cancel).await.unwrap();
    let classic = ctx
        .new_classic_command(["version"])
        .exec(&cancel)
        .await
        .unwrap();
    assert_contains(&current, "ccli");
    assert_contains(&classic, "classic 19.03");
}

#[test]
fn test_missing_current_binary_fails_setup() {
    let fake = FakeCli::new();
    let config = fake
        .config()
        .with_cli_binary(fake.bin.path().join("not-built"));
    let err = Suite::setup(config, Arc::new(CollectingFailHandler::new())).unwrap_err();
    match err {
        HarnessError::Staging { path, .. } => {
            assert_eq!(path, Some(fake.bin.path().join("not-built")));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_config_dir_is_isolated_per_test() {
    let fake = FakeCli::new();
    let suite = Suite::setup(fake.config(), Arc::new(CollectingFailHandler::new())).unwrap();
    let cancel = CancellationToken::new();

    let first = suite.begin_test("first").unwrap();
    let second = suite.begin_test("second").unwrap();
    assert_ne!(first.config_dir(), second.config_dir());

    first.write_config(r#"{"currentContext":"first"}"#).unwrap();
    second
        .write_config_json(&serde_json::json!({ "currentContext": "second" }))
        .unwrap();

    let seen_first = first.new_cli_command(["config"]).exec(&cancel).await.unwrap();
    let seen_second = second.new_cli_command(["config"]).exec(&cancel).await.unwrap();
    assert_contains(&seen_first, "first");
    assert_contains(&seen_second, "second");
    assert!(!seen_second.contains("\"first\""));
}

#[tokio::test]
async fn test_config_dir_removed_after_failing_test() {
    let fake = FakeCli::new();
    let collector = Arc::new(CollectingFailHandler::new());
    let suite = Suite::setup(fake.config(), collector.clone()).unwrap();
    let seen_dir: Arc<Mutex<Option<PathBuf>>> = Arc::default();

    let result = {
        let seen_dir = Arc::clone(&seen_dir);
        suite
            .run("fails", |ctx| async move {
                *seen_dir.lock().unwrap() = Some(ctx.config_dir().to_path_buf());
                ctx.write_config("{}")?;
                Err(HarnessError::Config(vec!["simulated".into()]))
            })
            .await
    };
    assert!(matches!(result, Err(HarnessError::AssertionFailed(_))));

    let dir = seen_dir.lock().unwrap().clone().unwrap();
    assert_path_missing(&dir);

    let reports = collector.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].test_name, "fails");
    assert_eq!(reports[0].config_contents.as_deref(), Ok("{}"));
}

#[tokio::test]
async fn test_failed_command_is_dumped_exactly_once() {
    let fake = FakeCli::new();
    let collector = Arc::new(CollectingFailHandler::new());
    let suite = Suite::setup(fake.config(), collector.clone()).unwrap();

    let result = suite
        .run("exec_or_fail", |ctx| async move {
            ctx.write_config(r#"{"auths":{}}"#)?;
            ctx.new_cli_command(["fail"])
                .exec_or_fail(&CancellationToken::new())
                .await?;
            Ok(())
        })
        .await;
    assert!(result.is_err());

    let reports = collector.reports();
    assert_eq!(reports.len(), 1);
    assert_contains(&reports[0].message, "simulated failure");
    assert!(
        reports[0]
            .listing
            .iter()
            .any(|p| p.ends_with("config.json"))
    );
}

#[tokio::test]
async fn test_exhausted_retry_dump_includes_last_output() {
    let fake = FakeCli::new();
    let collector = Arc::new(CollectingFailHandler::new());
    let suite = Suite::setup(fake.config(), collector.clone()).unwrap();

    let result = suite
        .run("waits_for_running", |ctx| async move {
            ctx.new_cli_command(["version"])
                .with_retry_policy(
                    RetryPolicy::new(Duration::from_millis(10)).with_max_attempts(2),
                )
                .retry_until(&CancellationToken::new(), |r| r.stdout_contains("Running"))
                .await?;
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(HarnessError::AssertionFailed(_))));

    let reports = collector.reports();
    assert_eq!(reports.len(), 1);
    assert_contains(&reports[0].message, "after 2 attempts");
    assert_contains(&reports[0].message, "ccli 0.3.0");
}

#[tokio::test]
async fn test_panicking_test_is_dumped_and_cleaned_up() {
    crate::test_log!("TEST START: test_panicking_test_is_dumped_and_cleaned_up");
    let fake = FakeCli::new();
    let collector = Arc::new(CollectingFailHandler::new());
    let suite = Suite::setup(fake.config(), collector.clone()).unwrap();
    let seen_dir: Arc<Mutex<Option<PathBuf>>> = Arc::default();

    let unwound = {
        let seen_dir = Arc::clone(&seen_dir);
        AssertUnwindSafe(suite.run("panics", |ctx| async move {
            *seen_dir.lock().unwrap() = Some(ctx.config_dir().to_path_buf());
            ctx.write_config(r#"{"x":1}"#)?;
            let replicas = 1;
            assert_eq!(replicas, 2, "replica count");
            Ok(())
        }))
        .catch_unwind()
        .await
    };
    assert!(unwound.is_err());

    let reports = collector.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].test_name, "panics");
    assert_eq!(reports[0].config_contents.as_deref(), Ok(r#"{"x":1}"#));
    assert_contains(&reports[0].message, "panicked");
    assert_contains(&reports[0].message, "replica count");

    let dir = seen_dir.lock().unwrap().clone().unwrap();
    assert_path_missing(&dir);
    crate::test_log!("TEST PASS: test_panicking_test_is_dumped_and_cleaned_up");
}

#[tokio::test]
async fn test_passing_test_produces_no_dump() {
    let fake = FakeCli::new();
    let collector = Arc::new(CollectingFailHandler::new());
    let suite = Suite::setup(fake.config(), collector.clone()).unwrap();

    suite
        .run("passes", |ctx| async move {
            let result = ctx
                .new_cli_command(["version"])
                .execute(&CancellationToken::new())
                .await?;
            ctx.assert_success(&result, "version")?;
            ctx.assert_stdout_contains(&result, "ccli", "version")
        })
        .await
        .unwrap();
    assert!(collector.reports().is_empty());
}

#[test]
fn test_teardown_removes_staging() {
    let fake = FakeCli::new();
    let suite = Suite::setup(fake.config(), Arc::new(CollectingFailHandler::new())).unwrap();
    let staging = suite.staging_dir().to_path_buf();
    suite.teardown().unwrap();
    assert_path_missing(&staging);
}

#[tokio::test]
async fn test_sequential_tests_never_share_config_dirs() {
    let fake = FakeCli::new();
    let suite = Suite::setup(fake.config(), Arc::new(CollectingFailHandler::new())).unwrap();
    let mut seen: Vec<PathBuf> = Vec::new();

    for i in 0..5 {
        let recorded: Arc<Mutex<Option<PathBuf>>> = Arc::default();
        let slot = Arc::clone(&recorded);
        suite
            .run(&format!("sequential_{i}"), |ctx| async move {
                *slot.lock().unwrap() = Some(ctx.config_dir().to_path_buf());
                Ok(())
            })
            .await
            .unwrap();

        let dir = recorded.lock().unwrap().clone().unwrap();
        assert_path_missing(&dir);
        assert!(!seen.contains(&dir), "config dir reused: {}", dir.display());
        seen.push(dir);
    }
}
