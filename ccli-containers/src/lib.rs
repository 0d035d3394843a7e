//! Container Capability Interface.
//!
//! The minimal surface a container backend exposes so the end-to-end
//! harness can drive and observe it: list, run, exec and logs. The harness
//! calls this contract; backends implement it.

pub mod errors;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod service;
pub mod types;

pub use errors::{ContainerError, ContainerResult};
#[cfg(any(test, feature = "test-support"))]
pub use memory::InMemoryContainerService;
pub use service::ContainerService;
pub use types::{Container, ContainerConfig, LogsRequest, ParseTailError, Port, Tail};
