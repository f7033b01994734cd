use async_trait::async_trait;
use log::{debug, warn};
use std::path::Path;
use std::time::Duration;

use super::types::{ContainerSpec, ContainerState, LogOutput};
use crate::error_handling::types::RuntimeError;

/// Control surface of the local container engine.
///
/// Implementations must be safe for concurrent calls on different container
/// ids. `stop` and `remove` are idempotent: a container that no longer exists
/// is not an error.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Makes sure `image` is present locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Creates (but does not start) a container and returns the engine id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Copies the contents of `host_dir` into `container_dir`.
    async fn copy_into(
        &self,
        id: &str,
        host_dir: &Path,
        container_dir: &str,
    ) -> Result<(), RuntimeError>;

    /// Copies the contents of `container_dir` back into `host_dir`.
    async fn copy_out(
        &self,
        id: &str,
        container_dir: &str,
        host_dir: &Path,
    ) -> Result<(), RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Blocks until the container exits and returns its exit code.
    async fn wait(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Stops the container, killing it after `grace`. A zero grace kills immediately.
    async fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Force-removes the container.
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;

    /// Current state, or `None` if the engine does not know the container.
    async fn inspect(&self, id: &str) -> Result<Option<ContainerState>, RuntimeError>;

    /// Fetches logs; each stream is capped at `limit` bytes.
    async fn logs(
        &self,
        id: &str,
        tail: Option<usize>,
        limit: usize,
    ) -> Result<LogOutput, RuntimeError>;

    /// Stop then remove. A failed stop is only logged, removal is forced anyway.
    async fn teardown(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        debug!("Tearing down container {}", id);
        if let Err(e) = self.stop(id, grace).await {
            warn!("Failed to stop container {} (removing anyway): {}", id, e);
        }
        self.remove(id).await
    }
}
