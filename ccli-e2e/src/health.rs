//! HTTP readiness checks for services started by tests.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::HarnessResult;
use crate::retry::{Probe, RetryPolicy};

/// Per-request timeout of a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One blocking GET; healthy means a 2xx/3xx response arrived.
pub fn probe(url: &str, timeout: Duration) -> bool {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();
    match agent.get(url).call() {
        Ok(_) => true,
        Err(e) => {
            debug!(url, error = %e, "Health probe failed");
            false
        }
    }
}

/// Whether `url` answers successfully right now.
pub async fn is_healthy(url: &str) -> bool {
    let url = url.to_string();
    tokio::task::spawn_blocking(move || probe(&url, PROBE_TIMEOUT))
        .await
        .unwrap_or(false)
}

/// Poll `url` under `policy` until it answers successfully.
pub async fn wait_healthy(
    url: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> HarnessResult<()> {
    policy
        .eval(url, cancel, |_| async move {
            Ok(if is_healthy(url).await {
                Probe::Ready(())
            } else {
                Probe::pending()
            })
        })
        .await
        .map(|_| ())
}
