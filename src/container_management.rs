//! Container management subsystem.
//!
//! Everything that talks to the container engine lives here. The rest of the
//! crate only sees the [`ContainerRuntime`] trait, so tests swap the Docker
//! client for an in-memory fake.
//!
//! Re-exports:
//! - [`ContainerRuntime`]: engine control surface.
//! - [`DockerCli`]: implementation over the `docker` (or compatible) CLI.
//! - [`ContainerLease`]: scoped ownership of one container.
//!
//! Example (non-running):
//! ```ignore
//! use sandboxd::container_management::{ContainerRuntime, DockerCli};
//!
//! let docker = DockerCli::connect("docker").await?;
//! let state = docker.inspect("some-container").await?;
//! println!("exists: {}", state.is_some());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod container_handle;
pub mod docker_cli;
#[cfg(test)]
pub mod fake_runtime;
#[cfg(test)]
pub mod integration_tests;
pub mod output_buffer;
pub mod runtime;
#[cfg(test)]
pub mod tests;
pub mod types;
pub mod workspace;

pub use container_handle::ContainerLease;
pub use docker_cli::DockerCli;
pub use runtime::ContainerRuntime;
pub use types::{ContainerSpec, ContainerState, LogOutput, NetworkPolicy, ResourceLimits};
