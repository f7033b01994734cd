use log::{error, info, warn};
use std::sync::Arc;

use crate::configuration::config::Config;
use crate::container_management::docker_cli::DockerCli;
use crate::container_management::runtime::ContainerRuntime;
use crate::error_handling::types::ControllerError;
use crate::executor::Executor;
use crate::port_allocator::PortAllocator;
use crate::preview::{LogArchive, PreviewManager};
use crate::reaper::{Reaper, ReaperHandle, ReaperSettings};
use crate::registry::{JsonFileStore, Registry, RegistryStore};
use crate::teardown::Teardown;

/// Wires every component around one runtime, one registry and one port range.
pub struct Controller {
    pub config: Config,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub registry: Arc<Registry>,
    pub ports: Arc<PortAllocator>,
    pub executor: Executor,
    pub previews: PreviewManager,
    pub reaper: Arc<Reaper>,
    reaper_handle: Option<ReaperHandle>,
}

impl Controller {
    /// Connects to the container engine and opens the registry document from `config`.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing controller");
        config.validate()?;

        let runtime: Arc<dyn ContainerRuntime> = match DockerCli::connect(&config.runtime.binary).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!("Unable to reach the container engine: {}", e);
                return Err(e.into());
            }
        };
        let store: Arc<dyn RegistryStore> = Arc::new(JsonFileStore::new(&config.registry.path));
        Self::with_parts(config, runtime, store).await
    }

    /// Builds the controller over an already connected runtime and a store.
    pub async fn with_parts(
        config: Config,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn RegistryStore>,
    ) -> Result<Self, ControllerError> {
        let (registry, report) = Registry::open(store, runtime.as_ref()).await.map_err(|e| {
            error!("Unable to load the registry: {}", e);
            ControllerError::from(e)
        })?;
        if report.failed > 0 {
            warn!(
                "{} record(s) had lost their container and were dropped",
                report.failed
            );
        }
        let registry = Arc::new(registry);

        let ports = Arc::new(
            PortAllocator::new(config.ports.start, config.ports.end)
                .with_host_probe(config.ports.probe_host),
        );
        let archive = Arc::new(LogArchive::new(config.preview.log_snapshot_capacity));

        let executor = Executor::new(runtime.clone(), registry.clone(), config.clone());
        let previews = PreviewManager::new(
            runtime.clone(),
            registry.clone(),
            ports.clone(),
            archive.clone(),
            config.clone(),
        );
        let teardown = Teardown {
            runtime: runtime.clone(),
            registry: registry.clone(),
            ports: ports.clone(),
            archive,
            grace: config.runtime.stop_grace(),
            log_tail: config.preview.log_tail_lines,
        };
        let reaper = Arc::new(Reaper::new(teardown, ReaperSettings::from_config(&config)));

        info!(
            "Controller ready: ports {}-{}, {} live record(s)",
            config.ports.start, config.ports.end, report.loaded
        );
        Ok(Self {
            config,
            runtime,
            registry,
            ports,
            executor,
            previews,
            reaper,
            reaper_handle: None,
        })
    }

    /// Starts the background reaper. Calling it twice has no effect.
    pub fn start_reaper(&mut self) {
        if self.reaper_handle.is_none() {
            self.reaper_handle = Some(self.reaper.clone().spawn());
        }
    }

    /// Runs the reaper until Ctrl-C.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        self.start_reaper();
        info!("Controller running, press Ctrl-C to stop");
        let signal = tokio::signal::ctrl_c().await;
        self.shutdown().await;
        signal.map_err(|e| ControllerError::InitializationFailed(format!("signal handler: {}", e)))
    }

    /// Stops the reaper, then every live preview.
    pub async fn shutdown(&mut self) {
        info!("Shutting down controller");
        if let Some(handle) = self.reaper_handle.take() {
            handle.shutdown().await;
        }
        let stopped = self.previews.stop_all().await;
        info!("Controller stopped ({} preview(s) torn down)", stopped);
    }
}
