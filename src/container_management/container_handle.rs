use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use super::runtime::ContainerRuntime;
use super::types::ContainerSpec;
use crate::error_handling::types::RuntimeError;

/// Scoped ownership of one runtime container.
///
/// The owning operation either calls [`ContainerLease::release`] (stop and
/// remove) or [`ContainerLease::into_inner`] (ownership moves to the registry).
/// A lease dropped while still armed, for instance because the owning future
/// was cancelled, schedules the removal on the current tokio runtime.
pub struct ContainerLease {
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
    grace: Duration,
    armed: bool,
}

impl ContainerLease {
    /// Creates a container from `spec` and wraps it in a lease.
    pub async fn create(
        runtime: Arc<dyn ContainerRuntime>,
        spec: &ContainerSpec,
        grace: Duration,
    ) -> Result<Self, RuntimeError> {
        let id = runtime.create(spec).await?;
        info!("Created container {} ({}) from {}", spec.name, id, spec.image);
        Ok(Self {
            runtime,
            id,
            grace,
            armed: true,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stops and removes the container.
    pub async fn release(mut self) -> Result<(), RuntimeError> {
        self.armed = false;
        match self.runtime.teardown(&self.id, self.grace).await {
            Ok(()) => {
                info!("Removed container {}", self.id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to remove container {}: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Disarms the lease and returns the runtime id; the caller now owns cleanup.
    pub fn into_inner(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.id)
    }
}

impl Drop for ContainerLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "Container lease for {} dropped while armed, scheduling removal",
                    id
                );
                let runtime = self.runtime.clone();
                handle.spawn(async move {
                    if let Err(e) = runtime.remove(&id).await {
                        warn!("Deferred removal of container {} failed: {}", id, e);
                    } else {
                        debug!("Deferred removal of container {} done", id);
                    }
                });
            }
            Err(_) => {
                warn!(
                    "Container lease for {} dropped outside a runtime; container may leak",
                    id
                );
            }
        }
    }
}
