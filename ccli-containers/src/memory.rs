//! In-memory backend for exercising the capability interface in tests.
//!
//! Enabled with the `test-support` feature. Containers start in the
//! `Running` state; `exec` echoes stdin to the writer; log lines are
//! appended with [`InMemoryContainerService::push_log`].

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{ContainerError, ContainerResult};
use crate::service::ContainerService;
use crate::types::{Container, ContainerConfig, LogsRequest, Port};

const RUNNING: &str = "Running";
const EXITED: &str = "Exited";

#[derive(Debug)]
struct Entry {
    container: Container,
    ports: Vec<Port>,
    logs: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    images: HashSet<String>,
    entries: Vec<Entry>,
}

impl State {
    fn find(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.container.id == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.container.id == name)
    }
}

/// A [`ContainerService`] that keeps all state in process memory.
#[derive(Debug, Default)]
pub struct InMemoryContainerService {
    state: Mutex<State>,
    log_appended: Notify,
}

impl InMemoryContainerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `image` resolvable by [`ContainerService::run`].
    pub fn with_image(self, image: impl Into<String>) -> Self {
        self.lock().images.insert(image.into());
        self
    }

    /// Append a line to a container's log buffer.
    pub fn push_log(&self, name: &str, line: impl Into<String>) -> ContainerResult<()> {
        {
            let mut state = self.lock();
            let entry = state
                .find_mut(name)
                .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
            entry.logs.push(line.into());
        }
        self.log_appended.notify_waiters();
        Ok(())
    }

    /// Mark a container as exited.
    pub fn stop(&self, name: &str) -> ContainerResult<()> {
        let mut state = self.lock();
        let entry = state
            .find_mut(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
        entry.container.status = EXITED.to_string();
        Ok(())
    }

    /// Published ports of a container.
    pub fn ports(&self, name: &str) -> Option<Vec<Port>> {
        self.lock().find(name).map(|e| e.ports.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log_lines_from(&self, name: &str, from: usize) -> ContainerResult<Vec<String>> {
        let state = self.lock();
        let entry = state
            .find(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
        Ok(entry.logs.get(from..).map(<[String]>::to_vec).unwrap_or_default())
    }
}

async fn write_lines(
    writer: &mut (dyn AsyncWrite + Send + Unpin),
    lines: &[String],
) -> ContainerResult<()> {
    for line in lines {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;
    Ok(())
}

#[async_trait]
impl ContainerService for InMemoryContainerService {
    async fn list(&self, cancel: &CancellationToken) -> ContainerResult<Vec<Container>> {
        if cancel.is_cancelled() {
            return Err(ContainerError::Cancelled);
        }
        Ok(self
            .lock()
            .entries
            .iter()
            .map(|e| e.container.clone())
            .collect())
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        config: ContainerConfig,
    ) -> ContainerResult<()> {
        if cancel.is_cancelled() {
            return Err(ContainerError::Cancelled);
        }
        let mut state = self.lock();
        if state.find(&config.id).is_some() {
            return Err(ContainerError::AlreadyExists(config.id));
        }
        if !state.images.contains(&config.image) {
            return Err(ContainerError::ImageNotFound(config.image));
        }
        debug!(id = %config.id, image = %config.image, "Starting in-memory container");
        state.entries.push(Entry {
            container: Container {
                id: config.id,
                status: RUNNING.to_string(),
                image: config.image,
                ..Default::default()
            },
            ports: config.ports,
            logs: Vec::new(),
        });
        Ok(())
    }

    async fn exec(
        &self,
        cancel: &CancellationToken,
        container_name: &str,
        command: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> ContainerResult<()> {
        {
            let state = self.lock();
            let entry = state
                .find(container_name)
                .ok_or_else(|| ContainerError::NotFound(container_name.to_string()))?;
            if !entry.container.is_running() {
                return Err(ContainerError::NotRunning(container_name.to_string()));
            }
        }
        debug!(container = container_name, command, "Exec in in-memory container");

        let copied = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ContainerError::Cancelled),
            copied = tokio::io::copy(reader, &mut *writer) => copied,
        };
        copied?;
        writer.flush().await?;
        Ok(())
    }

    async fn logs(
        &self,
        cancel: &CancellationToken,
        container_name: &str,
        request: LogsRequest<'_>,
    ) -> ContainerResult<()> {
        let LogsRequest {
            follow,
            tail,
            writer,
        } = request;

        let history = self.log_lines_from(container_name, 0)?;
        write_lines(writer, tail.select(&history)).await?;
        if !follow {
            return Ok(());
        }

        let mut cursor = history.len();
        loop {
            let appended = self.log_appended.notified();
            tokio::pin!(appended);
            // Register before reading so a push between the read and the
            // await is not missed.
            appended.as_mut().enable();

            let fresh = self.log_lines_from(container_name, cursor)?;
            cursor += fresh.len();
            write_lines(writer, &fresh).await?;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ContainerError::Cancelled),
                _ = &mut appended => {}
            }
        }
    }
}
