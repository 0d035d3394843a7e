//! The contract a container backend satisfies to be driven by the harness.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::errors::ContainerResult;
use crate::types::{Container, ContainerConfig, LogsRequest};

/// Interacts with the underlying container backend.
///
/// Every operation takes the caller's cancellation token first. Backends
/// must return [`ContainerError::Cancelled`](crate::ContainerError::Cancelled)
/// promptly once it fires.
#[async_trait]
pub trait ContainerService: Send + Sync {
    /// All containers known to the backend at call time.
    ///
    /// An empty backend yields an empty vec, not an error.
    async fn list(&self, cancel: &CancellationToken) -> ContainerResult<Vec<Container>>;

    /// Create and start a container.
    ///
    /// Fails with `AlreadyExists` when `config.id` is taken (the existing
    /// container is left untouched) and `ImageNotFound` when the image
    /// cannot be resolved.
    async fn run(&self, cancel: &CancellationToken, config: ContainerConfig)
    -> ContainerResult<()>;

    /// Run `command` inside a running container, streaming `reader` to its
    /// stdin and its output to `writer`.
    async fn exec(
        &self,
        cancel: &CancellationToken,
        container_name: &str,
        command: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> ContainerResult<()>;

    /// Stream a container's captured output.
    ///
    /// `request.tail` bounds the replayed history; with `request.follow` the
    /// call blocks until `cancel` fires.
    async fn logs(
        &self,
        cancel: &CancellationToken,
        container_name: &str,
        request: LogsRequest<'_>,
    ) -> ContainerResult<()>;
}
