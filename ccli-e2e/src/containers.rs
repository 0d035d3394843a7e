//! Harness-side helpers over a [`ContainerService`].

use ccli_containers::{Container, ContainerService, LogsRequest, Tail};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::HarnessResult;
use crate::retry::{Probe, RetryPolicy};

/// The container named `name`, if the backend knows it.
pub async fn find(
    service: &dyn ContainerService,
    cancel: &CancellationToken,
    name: &str,
) -> HarnessResult<Option<Container>> {
    let containers = service.list(cancel).await?;
    Ok(containers.into_iter().find(|c| c.id == name))
}

/// Poll until `name` reports `status` (case-insensitive).
pub async fn wait_for_status(
    service: &dyn ContainerService,
    cancel: &CancellationToken,
    name: &str,
    status: &str,
    policy: RetryPolicy,
) -> HarnessResult<Container> {
    let description = format!("container {name} {status}");
    let outcome = policy
        .eval(&description, cancel, |_| async move {
            match find(service, cancel, name).await? {
                Some(container) if container.status.eq_ignore_ascii_case(status) => {
                    Ok(Probe::Ready(container))
                }
                Some(container) => {
                    debug!(name, current = %container.status, wanted = status, "Status not reached");
                    Ok(Probe::pending())
                }
                None => Ok(Probe::pending()),
            }
        })
        .await?;
    Ok(outcome.value)
}

/// Run `command` in `name` with `stdin` and collect its output.
pub async fn exec_capture(
    service: &dyn ContainerService,
    cancel: &CancellationToken,
    name: &str,
    command: &str,
    stdin: &[u8],
) -> HarnessResult<String> {
    let mut reader = stdin;
    let mut output = Vec::new();
    service
        .exec(cancel, name, command, &mut reader, &mut output)
        .await?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// Replay the captured output of `name` without following.
pub async fn logs_capture(
    service: &dyn ContainerService,
    cancel: &CancellationToken,
    name: &str,
    tail: Tail,
) -> HarnessResult<String> {
    let mut output = Vec::new();
    service
        .logs(cancel, name, LogsRequest::new(&mut output).tail(tail))
        .await?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}
