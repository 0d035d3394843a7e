//! Values exchanged across the capability interface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::AsyncWrite;

/// Snapshot of one container as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub status: String,
    pub image: String,
    pub command: String,
    pub cpu_time: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub pids_current: u64,
    pub pids_limit: u64,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Container {
    /// Whether the backend reports this container as running.
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

/// A published port of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    /// Port on the host side.
    pub source: u32,
    /// Port inside the container.
    pub destination: u32,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.destination)
    }
}

/// Configuration for [`ContainerService::run`](crate::ContainerService::run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Uniquely identifies the container.
    pub id: String,
    /// Image reference the container is created from.
    pub image: String,
    /// Published ports.
    #[serde(default)]
    pub ports: Vec<Port>,
}

impl ContainerConfig {
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            ports: Vec::new(),
        }
    }

    pub fn with_port(mut self, source: u32, destination: u32) -> Self {
        self.ports.push(Port {
            source,
            destination,
        });
        self
    }
}

/// How much historical output a log request replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tail {
    #[default]
    All,
    Lines(usize),
}

/// Error parsing a [`Tail`] from its CLI form.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid tail value '{0}': expected \"all\" or a line count")]
pub struct ParseTailError(String);

impl FromStr for Tail {
    type Err = ParseTailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(Tail::All);
        }
        trimmed
            .parse::<usize>()
            .map(Tail::Lines)
            .map_err(|_| ParseTailError(s.to_string()))
    }
}

impl fmt::Display for Tail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tail::All => write!(f, "all"),
            Tail::Lines(n) => write!(f, "{n}"),
        }
    }
}

impl Tail {
    /// Select the replayed suffix of `lines`.
    pub fn select<'a, T>(&self, lines: &'a [T]) -> &'a [T] {
        match self {
            Tail::All => lines,
            Tail::Lines(n) => &lines[lines.len().saturating_sub(*n)..],
        }
    }
}

/// Parameters for [`ContainerService::logs`](crate::ContainerService::logs).
pub struct LogsRequest<'a> {
    /// Keep the call open, streaming new output until cancelled.
    pub follow: bool,
    pub tail: Tail,
    /// Destination for log output.
    pub writer: &'a mut (dyn AsyncWrite + Send + Unpin),
}

impl<'a> LogsRequest<'a> {
    pub fn new(writer: &'a mut (dyn AsyncWrite + Send + Unpin)) -> Self {
        Self {
            follow: false,
            tail: Tail::All,
            writer,
        }
    }

    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn tail(mut self, tail: Tail) -> Self {
        self.tail = tail;
        self
    }
}

impl fmt::Debug for LogsRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogsRequest")
            .field("follow", &self.follow)
            .field("tail", &self.tail)
            .finish_non_exhaustive()
    }
}
