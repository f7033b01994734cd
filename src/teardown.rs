use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::container_management::runtime::ContainerRuntime;
use crate::port_allocator::PortAllocator;
use crate::preview::log_archive::LogArchive;
use crate::registry::{ContainerKind, ContainerRecord, Registry};

/// Final cleanup of a record: keep its logs, remove its container, drop the
/// record, free its port. Shared by explicit stops, failed starts and the reaper.
#[derive(Clone)]
pub struct Teardown {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub registry: Arc<Registry>,
    pub ports: Arc<PortAllocator>,
    pub archive: Arc<LogArchive>,
    pub grace: Duration,
    pub log_tail: usize,
}

impl Teardown {
    /// Best-effort: every step runs even if an earlier one failed. Returns
    /// `false` if the container or the record could not be removed.
    pub async fn retire(&self, record: &ContainerRecord) -> bool {
        let mut clean = true;

        if let Some(runtime_id) = &record.runtime_id {
            if record.kind == ContainerKind::Preview {
                self.archive
                    .capture(self.runtime.as_ref(), &record.id, runtime_id, self.log_tail)
                    .await;
            }
            if let Err(e) = self.runtime.teardown(runtime_id, self.grace).await {
                warn!(
                    "Failed to remove container {} of {}: {}",
                    runtime_id, record.id, e
                );
                clean = false;
            }
        }

        if let Err(e) = self.registry.delete(&record.id).await {
            warn!("Failed to delete record {}: {}", record.id, e);
            clean = false;
        }
        if let Some(port) = record.port {
            self.ports.release(port);
        }

        if clean {
            info!("Retired {} ({:?})", record.id, record.kind);
        }
        clean
    }
}
