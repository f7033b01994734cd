use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::log_archive::{LogArchive, PREVIEW_LOG_LIMIT};
use crate::configuration::Config;
use crate::container_management::container_handle::ContainerLease;
use crate::container_management::runtime::ContainerRuntime;
use crate::container_management::types::{ContainerSpec, NetworkPolicy, PortBinding};
use crate::container_management::workspace::Workspace;
use crate::error_handling::types::{PreviewError, RegistryError};
use crate::languages::commands::preview_script;
use crate::languages::detect::{detect_framework, detect_language};
use crate::languages::{Framework, Language};
use crate::port_allocator::PortAllocator;
use crate::registry::{
    ContainerKind, ContainerRecord, ContainerStatus, RecordFilter, Registry,
};
use crate::teardown::Teardown;

/// Address readiness probes connect to; published ports are bound on the host.
const PROBE_HOST: &str = "127.0.0.1";
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const PROBE_READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub files: BTreeMap<String, String>,
    /// Follows from the framework, or from the files, when absent.
    pub language: Option<String>,
    /// Detected from the files when absent.
    pub framework: Option<String>,
    /// Clamped into the configured TTL bounds; the default TTL when absent.
    pub ttl: Option<Duration>,
    /// At most one live preview per session.
    pub session_id: Option<String>,
}

impl PreviewRequest {
    pub fn new(files: BTreeMap<String, String>, language: &str) -> Self {
        Self {
            files,
            language: Some(language.to_string()),
            framework: None,
            ttl: None,
            session_id: None,
        }
    }

    /// Request whose language and framework are both worked out from the files.
    pub fn detected(files: BTreeMap<String, String>) -> Self {
        Self {
            language: None,
            ..Self::new(files, "")
        }
    }

    pub fn with_framework(mut self, framework: &str) -> Self {
        self.framework = Some(framework.to_string());
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewStarted {
    pub id: String,
    pub url: String,
    pub port: u16,
    pub framework: Framework,
    pub expires_at: DateTime<Utc>,
}

/// Snapshot of a preview for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewInfo {
    pub id: String,
    pub status: ContainerStatus,
    pub url: Option<String>,
    pub port: Option<u16>,
    pub language: String,
    pub framework: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub seconds_remaining: Option<i64>,
    pub time_remaining: Option<String>,
}

impl PreviewInfo {
    pub fn from_record(record: &ContainerRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            url: record.url.clone(),
            port: record.port,
            language: record.language.clone(),
            framework: record.framework.clone(),
            session_id: record.session_id.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            seconds_remaining: record.time_remaining(now).map(|left| left.num_seconds()),
            time_remaining: record.time_remaining_display(now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ExtendOutcome {
    Extended { expires_at: DateTime<Utc> },
    NotFound,
    AlreadyExpired,
}

/// Why a started container never became reachable.
enum StartFailure {
    NotReady(String),
    Runtime(PreviewError),
}

/// Hosts long-lived preview containers behind allocated host ports.
///
/// The registry record is written before the container exists and carries
/// the port, so a crash at any point leaves a record the next load or the
/// reaper can reconcile.
pub struct PreviewManager {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<Registry>,
    ports: Arc<PortAllocator>,
    archive: Arc<LogArchive>,
    teardown: Teardown,
    config: Config,
}

impl PreviewManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<Registry>,
        ports: Arc<PortAllocator>,
        archive: Arc<LogArchive>,
        config: Config,
    ) -> Self {
        let teardown = Teardown {
            runtime: runtime.clone(),
            registry: registry.clone(),
            ports: ports.clone(),
            archive: archive.clone(),
            grace: config.runtime.stop_grace(),
            log_tail: config.preview.log_tail_lines,
        };
        Self {
            runtime,
            registry,
            ports,
            archive,
            teardown,
            config,
        }
    }

    fn resolve(&self, request: &PreviewRequest) -> Result<(Language, Framework), PreviewError> {
        let framework = match &request.framework {
            Some(name) => Some(
                Framework::parse(name)
                    .ok_or_else(|| PreviewError::UnsupportedFramework(name.clone()))?,
            ),
            None => detect_framework(&request.files),
        };
        let language = match &request.language {
            Some(name) => Language::parse(name)
                .ok_or_else(|| PreviewError::UnsupportedLanguage(name.clone()))?,
            None => framework
                .map(|f| f.language())
                .or_else(|| detect_language(&request.files))
                .ok_or_else(|| {
                    PreviewError::UnsupportedLanguage("not detectable from the files".to_string())
                })?,
        };
        let framework = framework
            .ok_or_else(|| PreviewError::UnsupportedFramework("none detected".to_string()))?;
        if framework.language() != language {
            return Err(PreviewError::UnsupportedFramework(format!(
                "{} is not a {} framework",
                framework, language
            )));
        }
        Ok((language, framework))
    }

    pub async fn start(&self, request: PreviewRequest) -> Result<PreviewStarted, PreviewError> {
        let (language, framework) = self.resolve(&request)?;
        let workspace = Workspace::materialize(&request.files)?;

        if let Some(session) = &request.session_id {
            if let Some(existing) = self.registry.find_by_session(session).await {
                info!("Session {} already has preview {}", session, existing.id);
                return Err(PreviewError::AlreadyRunning {
                    url: existing.url.clone().unwrap_or_default(),
                    id: existing.id,
                });
            }
        }

        let ttl = self
            .config
            .preview
            .clamp_ttl(request.ttl.unwrap_or_else(|| self.config.preview.default_ttl()));

        // Pulled before a port is held: a pull can take minutes and the caller may give up.
        let language_config = self.config.language(language);
        let image = language_config.image.clone();
        if let Err(e) = self.runtime.ensure_image(&image).await {
            error!("Image {} unavailable: {}", image, e);
            return Err(e.into());
        }

        let reservation = self.ports.reserve(&self.registry.ports_in_use().await)?;
        let port = reservation.port();

        let mut record = ContainerRecord::new(ContainerKind::Preview, language.as_str(), &image);
        record.framework = Some(framework.to_string());
        record.port = Some(port);
        record.internal_port = Some(framework.internal_port());
        record.url = Some(format!("http://{}:{}", self.config.preview.host, port));
        record.session_id = request.session_id.clone();
        record.expires_at = Some(record.created_at + chrono_duration(ttl));
        let record_id = record.id.clone();
        let url = record.url.clone().unwrap_or_default();

        self.registry.create(record).await?;
        reservation.commit();
        info!(
            "Preview {} ({} / {}) registered on port {}",
            record_id, language, framework, port
        );

        let mut spec = ContainerSpec::shell(
            &record_id,
            &image,
            &preview_script(&request.files, framework),
            language_config.limits(),
        );
        spec.network = NetworkPolicy::Bridge;
        spec.port = Some(PortBinding {
            host_port: port,
            container_port: framework.internal_port(),
        });
        spec.env = framework.env();
        spec.labels = vec![
            ("sandboxd.kind".to_string(), ContainerKind::Preview.as_str().to_string()),
            ("sandboxd.record".to_string(), record_id.clone()),
        ];

        let lease = match ContainerLease::create(
            self.runtime.clone(),
            &spec,
            self.config.runtime.stop_grace(),
        )
        .await
        {
            Ok(lease) => lease,
            Err(e) => {
                error!("Preview {} container could not be created: {}", record_id, e);
                self.abandon(&record_id).await;
                return Err(e.into());
            }
        };

        match self.bring_up(&record_id, &lease, &workspace, port).await {
            Ok(()) => {}
            Err(failure) => {
                let logs = self
                    .archive
                    .capture(
                        self.runtime.as_ref(),
                        &record_id,
                        lease.id(),
                        self.config.preview.log_tail_lines,
                    )
                    .await;
                if let Err(e) = lease.release().await {
                    warn!("Container of failed preview {} not removed: {}", record_id, e);
                }
                self.abandon(&record_id).await;
                return Err(match failure {
                    StartFailure::NotReady(reason) => {
                        error!("Preview {} failed to start: {}", record_id, reason);
                        PreviewError::StartupFailed { reason, logs }
                    }
                    StartFailure::Runtime(e) => {
                        error!("Preview {} failed to start: {}", record_id, e);
                        e
                    }
                });
            }
        }

        let record = match self
            .registry
            .set_status(&record_id, ContainerStatus::Running)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                // Stopped or reaped while starting; the container is ours to remove.
                warn!("Preview {} could not be marked running: {}", record_id, e);
                if let Err(e) = lease.release().await {
                    warn!("Container of preview {} not removed: {}", record_id, e);
                }
                self.abandon(&record_id).await;
                return Err(e.into());
            }
        };
        lease.into_inner();

        info!("Preview {} ready at {}", record_id, url);
        Ok(PreviewStarted {
            id: record_id,
            url,
            port,
            framework,
            expires_at: record.expires_at.unwrap_or_else(Utc::now),
        })
    }

    /// Records the container id, copies the project in, starts it and waits for the port.
    async fn bring_up(
        &self,
        record_id: &str,
        lease: &ContainerLease,
        workspace: &Workspace,
        port: u16,
    ) -> Result<(), StartFailure> {
        let container = lease.id();
        self.registry
            .update(record_id, |record| {
                record.runtime_id = Some(container.to_string());
            })
            .await
            .map_err(|e| StartFailure::Runtime(e.into()))?;
        self.runtime
            .copy_into(container, workspace.path(), "/app")
            .await
            .map_err(|e| StartFailure::Runtime(e.into()))?;
        self.runtime
            .start(container)
            .await
            .map_err(|e| StartFailure::Runtime(e.into()))?;
        info!("Preview {} container {} started", record_id, container);

        self.wait_until_ready(record_id, container, port)
            .await
            .map_err(StartFailure::NotReady)
    }

    /// Polls the published port until it answers, the container exits, or
    /// the readiness timeout passes.
    async fn wait_until_ready(
        &self,
        record_id: &str,
        container: &str,
        port: u16,
    ) -> Result<(), String> {
        let timeout = self.config.preview.readiness_timeout();
        let interval = self.config.preview.readiness_interval();
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if probe_port(port).await {
                info!(
                    "Preview {} answered on port {} after {} attempt(s)",
                    record_id, port, attempts
                );
                return Ok(());
            }

            match self.runtime.inspect(container).await {
                Ok(Some(state)) if state.has_exited() => {
                    return Err(format!(
                        "container exited with code {} before the app was ready",
                        state
                            .exit_code
                            .map_or_else(|| "unknown".to_string(), |c| c.to_string())
                    ));
                }
                Ok(None) => return Err("container disappeared during startup".to_string()),
                Ok(Some(_)) => {}
                Err(e) => debug!("Inspect of {} failed during startup: {}", container, e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(format!(
                    "app did not answer on port {} within {}s",
                    port,
                    timeout.as_secs()
                ));
            }
            debug!(
                "Readiness attempt {} for preview {} failed, retrying",
                attempts, record_id
            );
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }

    /// Marks a record failed and retires it. Used on every failed start.
    async fn abandon(&self, record_id: &str) {
        match self
            .registry
            .set_status(record_id, ContainerStatus::Failed)
            .await
        {
            Ok(record) => {
                self.teardown.retire(&record).await;
            }
            Err(RegistryError::InvalidTransition { .. }) => {
                if let Some(record) = self.registry.get(record_id).await {
                    self.teardown.retire(&record).await;
                }
            }
            Err(RegistryError::NotFound(_)) => {}
            Err(e) => {
                warn!("Could not mark preview {} failed: {}", record_id, e);
                if let Some(record) = self.registry.get(record_id).await {
                    self.teardown.retire(&record).await;
                }
            }
        }
    }

    fn preview_record(record: Option<ContainerRecord>) -> Option<ContainerRecord> {
        record.filter(|r| r.kind == ContainerKind::Preview)
    }

    /// Stops a preview. A second stop, or a stop racing the reaper, yields `NotFound`.
    pub async fn stop(&self, id: &str) -> Result<StopOutcome, PreviewError> {
        let Some(record) = Self::preview_record(self.registry.get(id).await) else {
            return Ok(StopOutcome::NotFound);
        };
        if record.status.is_terminal() {
            return Ok(StopOutcome::NotFound);
        }

        let record = match self.registry.set_status(id, ContainerStatus::Stopped).await {
            Ok(record) => record,
            Err(RegistryError::NotFound(_)) | Err(RegistryError::InvalidTransition { .. }) => {
                return Ok(StopOutcome::NotFound)
            }
            Err(e) => return Err(e.into()),
        };
        self.teardown.retire(&record).await;
        info!("Preview {} stopped", id);
        Ok(StopOutcome::Stopped)
    }

    /// Pushes the expiry out by `ttl`, capped at `now + max_ttl`.
    pub async fn extend(&self, id: &str, ttl: Duration) -> Result<ExtendOutcome, PreviewError> {
        let now = Utc::now();
        let Some(record) = Self::preview_record(self.registry.get(id).await) else {
            return Ok(ExtendOutcome::NotFound);
        };
        if record.status.is_terminal() || record.is_expired_at(now) {
            return Ok(ExtendOutcome::AlreadyExpired);
        }

        let ttl = chrono_duration(self.config.preview.clamp_ttl(ttl));
        let cap = now + chrono_duration(self.config.preview.max_ttl());
        let current = record.expires_at.unwrap_or(now);
        let extended = (current + ttl).min(cap);

        match self
            .registry
            .update(id, |record| record.expires_at = Some(extended))
            .await
        {
            Ok(_) => {
                info!("Preview {} extended until {}", id, extended);
                Ok(ExtendOutcome::Extended {
                    expires_at: extended,
                })
            }
            Err(RegistryError::NotFound(_)) => Ok(ExtendOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Recent output of a preview. After teardown this is the archived snapshot,
    /// or empty if none was kept. Never fails.
    pub async fn logs(&self, id: &str, tail: Option<usize>) -> String {
        let tail = tail.unwrap_or(self.config.preview.log_tail_lines);
        if let Some(record) = self.registry.get(id).await {
            if let Some(runtime_id) = &record.runtime_id {
                match self
                    .runtime
                    .logs(runtime_id, Some(tail), PREVIEW_LOG_LIMIT)
                    .await
                {
                    Ok(logs) => return logs.combined(),
                    Err(e) => debug!("Live logs of {} unavailable: {}", id, e),
                }
            }
        }
        self.archive.get(id).unwrap_or_default()
    }

    /// Current state of a preview.
    ///
    /// A `Starting` preview whose port now answers is promoted to `Running`;
    /// one whose container has exited is marked `Failed` for the reaper.
    pub async fn status(&self, id: &str) -> Option<PreviewInfo> {
        let mut record = Self::preview_record(self.registry.get(id).await)?;

        if record.status == ContainerStatus::Starting {
            if let (Some(runtime_id), Some(port)) = (record.runtime_id.clone(), record.port) {
                let next = if probe_port(port).await {
                    Some(ContainerStatus::Running)
                } else {
                    match self.runtime.inspect(&runtime_id).await {
                        Ok(Some(state)) if state.has_exited() => Some(ContainerStatus::Failed),
                        Ok(None) => Some(ContainerStatus::Failed),
                        _ => None,
                    }
                };
                if let Some(status) = next {
                    match self.registry.set_status(id, status).await {
                        Ok(updated) => record = updated,
                        Err(e) => debug!("Status refresh of {} skipped: {}", id, e),
                    }
                }
            }
        }
        Some(PreviewInfo::from_record(&record, Utc::now()))
    }

    pub async fn list(&self) -> Vec<PreviewInfo> {
        let now = Utc::now();
        self.registry
            .list(Some(&RecordFilter::kind(ContainerKind::Preview)))
            .await
            .iter()
            .map(|record| PreviewInfo::from_record(record, now))
            .collect()
    }

    /// Stops every live preview; returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let live = self
            .registry
            .list(Some(&RecordFilter::kind(ContainerKind::Preview).active()))
            .await;
        let mut stopped = 0;
        for record in live {
            match self.stop(&record.id).await {
                Ok(StopOutcome::Stopped) => stopped += 1,
                Ok(StopOutcome::NotFound) => {}
                Err(e) => warn!("Failed to stop preview {}: {}", record.id, e),
            }
        }
        info!("Stopped {} preview(s)", stopped);
        stopped
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(1))
}

/// True once something on the port answers a request with at least one byte.
///
/// A bare connect is not enough: the engine's port proxy accepts connections
/// before the app inside listens, then closes them without data.
pub async fn probe_port(port: u16) -> bool {
    let connect = TcpStream::connect((PROBE_HOST, port));
    let mut stream = match tokio::time::timeout(PROBE_CONNECT_TIMEOUT, connect).await {
        Ok(Ok(stream)) => stream,
        _ => return false,
    };
    if stream
        .write_all(b"GET / HTTP/1.0\r\nHost: localhost\r\n\r\n")
        .await
        .is_err()
    {
        return false;
    }
    let mut buffer = [0u8; 64];
    matches!(
        tokio::time::timeout(PROBE_READ_TIMEOUT, stream.read(&mut buffer)).await,
        Ok(Ok(n)) if n > 0
    )
}
