use std::sync::Arc;
use std::time::Duration;

use ccli_e2e::backend::{
    ContainerConfig, ContainerError, ContainerService, InMemoryContainerService, LogsRequest, Tail,
};
use ccli_e2e::containers::{exec_capture, find, logs_capture, wait_for_status};
use ccli_e2e::{CancellationToken, HarnessError, RetryPolicy};

fn backend() -> Arc<InMemoryContainerService> {
    Arc::new(InMemoryContainerService::new().with_image("nginx:alpine"))
}

#[tokio::test]
async fn test_run_list_and_collision_through_trait_object() {
    let concrete = backend();
    let service: Arc<dyn ContainerService> = concrete.clone();
    let cancel = CancellationToken::new();

    assert!(service.list(&cancel).await.unwrap().is_empty());

    service
        .run(
            &cancel,
            ContainerConfig::new("web", "nginx:alpine").with_port(8080, 80),
        )
        .await
        .unwrap();
    let err = service
        .run(&cancel, ContainerConfig::new("web", "nginx:alpine"))
        .await
        .unwrap_err();
    assert!(err.is_collision());

    let web = find(service.as_ref(), &cancel, "web").await.unwrap().unwrap();
    assert!(web.is_running());
    assert_eq!(concrete.ports("web").unwrap()[0].to_string(), "8080:80");
}

#[tokio::test]
async fn test_exec_and_tail_logs() {
    let concrete = backend();
    let service: Arc<dyn ContainerService> = concrete.clone();
    let cancel = CancellationToken::new();
    service
        .run(&cancel, ContainerConfig::new("web", "nginx:alpine"))
        .await
        .unwrap();

    let echoed = exec_capture(service.as_ref(), &cancel, "web", "cat", b"hello")
        .await
        .unwrap();
    assert_eq!(echoed, "hello");

    for line in ["starting", "listening on :80", "ready"] {
        concrete.push_log("web", line).unwrap();
    }
    let all = logs_capture(service.as_ref(), &cancel, "web", Tail::All)
        .await
        .unwrap();
    assert_eq!(all.lines().count(), 3);
    let last = logs_capture(service.as_ref(), &cancel, "web", "1".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(last, "ready\n");
}

#[tokio::test]
async fn test_follow_returns_cancelled_when_token_fires() {
    let concrete = backend();
    let service: Arc<dyn ContainerService> = concrete.clone();
    let cancel = CancellationToken::new();
    service
        .run(&cancel, ContainerConfig::new("web", "nginx:alpine"))
        .await
        .unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let mut sink = Vec::new();
    let err = tokio::time::timeout(
        Duration::from_secs(2),
        service.logs(&cancel, "web", LogsRequest::new(&mut sink).follow(true)),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, ContainerError::Cancelled));
}

#[tokio::test]
async fn test_wait_for_exited_status() {
    let concrete = backend();
    let service: Arc<dyn ContainerService> = concrete.clone();
    let cancel = CancellationToken::new();
    service
        .run(&cancel, ContainerConfig::new("job", "nginx:alpine"))
        .await
        .unwrap();

    let stopper = Arc::clone(&concrete);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.stop("job").unwrap();
    });

    let job = wait_for_status(
        service.as_ref(),
        &cancel,
        "job",
        "exited",
        RetryPolicy::until(Duration::from_millis(20), Duration::from_secs(2)),
    )
    .await
    .unwrap();
    assert!(!job.is_running());
}

#[tokio::test]
async fn test_unknown_image_surfaces_as_harness_error() {
    let service = backend();
    let cancel = CancellationToken::new();
    let err: HarnessError = service
        .run(&cancel, ContainerConfig::new("web", "redis"))
        .await
        .unwrap_err()
        .into();
    assert!(matches!(err, HarnessError::Container(ContainerError::ImageNotFound(_))));
}
