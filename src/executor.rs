use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::configuration::Config;
use crate::container_management::container_handle::ContainerLease;
use crate::container_management::runtime::ContainerRuntime;
use crate::container_management::types::{ContainerSpec, LogOutput, NetworkPolicy, ResourceLimits};
use crate::container_management::workspace::Workspace;
use crate::error_handling::types::ExecutionError;
use crate::languages::commands::{execution_env, execution_install_command, execution_run_command};
use crate::languages::detect::{detect_language, find_entry_file};
use crate::languages::Language;
use crate::registry::{ContainerKind, ContainerRecord, ContainerStatus, Registry};

const APP_DIR: &str = "/app";

/// One-shot run request.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Relative path to file content.
    pub files: BTreeMap<String, String>,
    /// Detected from the files when absent.
    pub language: Option<String>,
    /// Overrides the configured run timeout.
    pub timeout: Option<Duration>,
    /// Overrides the configured resource caps.
    pub limits: Option<ResourceLimits>,
}

impl ExecutionRequest {
    pub fn new(files: BTreeMap<String, String>, language: &str) -> Self {
        Self {
            files,
            language: Some(language.to_string()),
            timeout: None,
            limits: None,
        }
    }

    /// Request whose language is worked out from the files.
    pub fn detected(files: BTreeMap<String, String>) -> Self {
        Self {
            language: None,
            ..Self::new(files, "")
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Install,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

/// Captured outcome of a run. A timeout is a result, not an error: the output
/// produced until the deadline is still returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Absent when the container was killed before it could report one.
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    pub language: Language,
    pub entry_file: String,
    /// Phase that produced this result; `Install` means the run never started.
    pub phase: ExecutionPhase,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl ExecutionResult {
    pub fn status(&self) -> ExecutionStatus {
        if self.timed_out {
            ExecutionStatus::Timeout
        } else if self.phase == ExecutionPhase::Run && self.exit_code == Some(0) {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        }
    }
}

/// What one container produced.
struct PhaseOutput {
    exit_code: Option<i64>,
    timed_out: bool,
    logs: LogOutput,
}

impl PhaseOutput {
    fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs programs to completion in throwaway, network-less containers.
///
/// Every container is held by a [`ContainerLease`] and released before `run`
/// returns, whatever the outcome. While a run is in flight it is tracked by an
/// `Execution` record carrying the container id, so a crash mid-run leaves
/// something for the registry load or the reaper to clean up.
pub struct Executor {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<Registry>,
    config: Config,
}

impl Executor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<Registry>, config: Config) -> Self {
        Self {
            runtime,
            registry,
            config,
        }
    }

    pub async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        let language = match &request.language {
            Some(name) => Language::parse(name)
                .ok_or_else(|| ExecutionError::UnsupportedLanguage(name.clone()))?,
            // Frontend-only projects detect as nothing: they never run to completion.
            None => detect_language(&request.files).ok_or_else(|| {
                ExecutionError::UnsupportedLanguage("not detectable from the files".to_string())
            })?,
        };
        let entry_file = find_entry_file(&request.files, language)
            .ok_or_else(|| ExecutionError::NoEntryFile(language.to_string()))?;
        let workspace = Workspace::materialize(&request.files)?;

        let image = self.config.language(language).image.clone();
        let limits = request
            .limits
            .clone()
            .unwrap_or_else(|| self.config.execution.limits());
        let timeout = request.timeout.unwrap_or_else(|| self.config.execution.timeout());

        self.runtime.ensure_image(&image).await?;

        let record = ContainerRecord::new(ContainerKind::Execution, language.as_str(), &image);
        let record_id = record.id.clone();
        self.registry.create(record).await?;
        info!(
            "Execution {} started: {} entry {} (timeout {:?})",
            record_id, language, entry_file, timeout
        );

        let outcome = self
            .execute(&record_id, &request.files, language, &entry_file, &image, limits, timeout, &workspace)
            .await;

        if let Err(e) = self.registry.delete(&record_id).await {
            warn!("Could not delete execution record {}: {}", record_id, e);
        }

        let (phase, output) = match outcome {
            Ok(done) => done,
            Err(e) => {
                error!("Execution {} failed: {}", record_id, e);
                return Err(e);
            }
        };

        let message = if output.timed_out {
            Some(match phase {
                ExecutionPhase::Install => format!(
                    "Dependency installation timed out after {}s",
                    self.config.execution.install_timeout().as_secs_f64()
                ),
                ExecutionPhase::Run => {
                    format!("Execution timed out after {}s", timeout.as_secs_f64())
                }
            })
        } else if phase == ExecutionPhase::Install {
            Some("Dependency installation failed".to_string())
        } else {
            None
        };

        let result = ExecutionResult {
            stdout: output.logs.stdout,
            stderr: output.logs.stderr,
            exit_code: output.exit_code,
            timed_out: output.timed_out,
            language,
            entry_file,
            phase,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            message,
        };
        info!(
            "Execution {} finished: {:?} (exit {:?}, {} ms)",
            record_id,
            result.status(),
            result.exit_code,
            result.duration_ms
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        record_id: &str,
        files: &BTreeMap<String, String>,
        language: Language,
        entry_file: &str,
        image: &str,
        limits: ResourceLimits,
        timeout: Duration,
        workspace: &Workspace,
    ) -> Result<(ExecutionPhase, PhaseOutput), ExecutionError> {
        let install = if self.config.execution.install_dependencies {
            execution_install_command(files, language)
        } else {
            None
        };

        // Installed dependencies land here and replace the original input.
        let installed;
        let mut input = workspace.path();
        if let Some(script) = install {
            info!("Execution {} installing dependencies: {}", record_id, script);
            let mut spec = self.spec(record_id, "install", image, &script, limits.clone());
            spec.network = NetworkPolicy::Bridge;
            installed = Workspace::empty()?;
            let output = self
                .run_container(
                    record_id,
                    &spec,
                    input,
                    self.config.execution.install_timeout(),
                    Some(installed.path()),
                )
                .await?;
            if !output.succeeded() {
                warn!(
                    "Execution {} dependency install failed (exit {:?})",
                    record_id, output.exit_code
                );
                return Ok((ExecutionPhase::Install, output));
            }
            input = installed.path();
        }

        let mut spec = self.spec(
            record_id,
            "run",
            image,
            &execution_run_command(entry_file, language),
            limits,
        );
        spec.env = execution_env(language);
        let output = self.run_container(record_id, &spec, input, timeout, None).await?;
        Ok((ExecutionPhase::Run, output))
    }

    fn spec(
        &self,
        record_id: &str,
        phase: &str,
        image: &str,
        script: &str,
        limits: ResourceLimits,
    ) -> ContainerSpec {
        let mut spec = ContainerSpec::shell(&format!("{}-{}", record_id, phase), image, script, limits);
        spec.working_dir = APP_DIR.to_string();
        spec.labels = vec![
            ("sandboxd.kind".to_string(), ContainerKind::Execution.as_str().to_string()),
            ("sandboxd.record".to_string(), record_id.to_string()),
        ];
        spec
    }

    /// Creates one container, drives it, and always releases it.
    async fn run_container(
        &self,
        record_id: &str,
        spec: &ContainerSpec,
        input: &Path,
        timeout: Duration,
        copy_back: Option<&Path>,
    ) -> Result<PhaseOutput, ExecutionError> {
        let lease =
            ContainerLease::create(self.runtime.clone(), spec, self.config.runtime.stop_grace())
                .await?;
        let outcome = self.drive(record_id, &lease, input, timeout, copy_back).await;
        if lease.release().await.is_err() {
            error!(
                "Container of execution {} could not be removed; the reaper will retry",
                record_id
            );
        }
        outcome
    }

    async fn drive(
        &self,
        record_id: &str,
        lease: &ContainerLease,
        input: &Path,
        timeout: Duration,
        copy_back: Option<&Path>,
    ) -> Result<PhaseOutput, ExecutionError> {
        let container = lease.id();
        self.registry
            .update(record_id, |record| {
                record.runtime_id = Some(container.to_string());
            })
            .await?;

        self.runtime.copy_into(container, input, APP_DIR).await?;
        self.runtime.start(container).await?;
        self.registry
            .set_status(record_id, ContainerStatus::Running)
            .await?;
        debug!("Execution {} container {} running", record_id, container);

        let (exit_code, timed_out) =
            match tokio::time::timeout(timeout, self.runtime.wait(container)).await {
                Ok(Ok(code)) => (Some(code), false),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!(
                        "Execution {} exceeded {:?}, killing container {}",
                        record_id, timeout, container
                    );
                    if let Err(e) = self.runtime.stop(container, Duration::ZERO).await {
                        warn!("Failed to kill container {}: {}", container, e);
                    }
                    let code = match self.runtime.inspect(container).await {
                        Ok(Some(state)) => state.exit_code.filter(|code| *code != 0),
                        _ => None,
                    };
                    (code, true)
                }
            };

        let logs = match self
            .runtime
            .logs(container, None, self.config.execution.output_limit_bytes)
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Could not fetch output of container {}: {}", container, e);
                LogOutput::default()
            }
        };

        if let Some(target) = copy_back {
            if !timed_out && exit_code == Some(0) {
                self.runtime.copy_out(container, APP_DIR, target).await?;
            }
        }

        Ok(PhaseOutput {
            exit_code,
            timed_out,
            logs,
        })
    }
}
