use std::sync::Arc;
use std::time::{Duration, Instant};

use ccli_e2e::{CancellationToken, CmdContext, CollectingFailHandler, HarnessError, Suite};

use crate::common::{FakeCli, assert_contains};

fn suite(fake: &FakeCli) -> Suite {
    Suite::setup(fake.config(), Arc::new(CollectingFailHandler::new())).unwrap()
}

#[tokio::test]
async fn test_retries_rerun_failing_command() {
    crate::test_log!("TEST START: test_retries_rerun_failing_command");
    let fake = FakeCli::new();
    let suite = suite(&fake);
    let ctx = suite.begin_test("retries").unwrap();

    let err = ctx
        .new_cli_command(["fail"])
        .with_retries(2)
        .exec(&CancellationToken::new())
        .await
        .unwrap_err();
    match &err {
        HarnessError::RetryExhausted { attempts, last, .. } => {
            assert_eq!(*attempts, 3);
            let last = last.as_ref().unwrap();
            assert_contains(&last.stderr, "simulated failure");
        }
        other => panic!("unexpected error: {other}"),
    }

    let recorded = std::fs::read_to_string(ctx.config_dir().join("attempts")).unwrap();
    assert_eq!(recorded.lines().count(), 3);
    crate::test_log!("TEST PASS: test_retries_rerun_failing_command");
}

#[tokio::test]
async fn test_unresolvable_executable_is_not_retried() {
    let fake = FakeCli::new();
    let suite = suite(&fake);
    let ctx = suite.begin_test("unresolvable").unwrap();

    let started = Instant::now();
    let err = ctx
        .new_command("ccli-not-a-real-binary", ["--version"])
        .with_retries(3)
        .every(Duration::from_millis(200))
        .exec(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Execution { .. }));
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_cancel_stops_long_running_command() {
    let fake = FakeCli::new();
    let suite = suite(&fake);
    let ctx = suite.begin_test("cancel").unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = ctx
        .new_cli_command(["sleep", "30"])
        .execute(&cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_timeout_is_retried_then_exhausted() {
    let fake = FakeCli::new();
    let suite = suite(&fake);
    let ctx = suite.begin_test("timeout").unwrap();

    let err = ctx
        .new_cli_command(["sleep", "5"])
        .with_timeout(Duration::from_millis(100))
        .with_retries(1)
        .exec(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::RetryExhausted { attempts: 2, last: None, .. }));
}

#[tokio::test]
async fn test_unknown_subcommand_reports_exit_code() {
    let fake = FakeCli::new();
    let suite = suite(&fake);
    let ctx = suite.begin_test("unknown").unwrap();

    let result = ctx
        .new_cli_command(["frobnicate"])
        .output(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.exit_code, Some(2));
    assert_contains(&result.stderr, "unknown command: frobnicate");
}

#[tokio::test]
async fn test_list_processes_command() {
    if which::which("ps").is_err() {
        return;
    }
    let fake = FakeCli::new();
    let suite = suite(&fake);
    let ctx = suite.begin_test("ps").unwrap();

    let cmd = ctx.list_processes_command();
    assert_eq!(cmd.command(), "ps");
    let result = cmd.execute(&CancellationToken::new()).await.unwrap();
    assert!(!result.stdout_lines().is_empty());
}

#[tokio::test]
async fn test_standalone_command_outside_suite() {
    let stdout = CmdContext::new("sh", ["-c", "echo standalone"])
        .exec(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stdout.trim(), "standalone");
}
