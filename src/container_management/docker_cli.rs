use async_trait::async_trait;
use log::{debug, error, info};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::output_buffer::OutputBuffer;
use super::runtime::ContainerRuntime;
use super::types::{ContainerSpec, ContainerState, LogOutput, NetworkPolicy, RunState};
use crate::error_handling::types::RuntimeError;

/// Process limit applied to containers without network access.
const EXECUTION_PIDS_LIMIT: u32 = 256;

/// Container runtime client driving a Docker-compatible engine through its CLI.
///
/// Design notes:
/// - Every call is a short-lived `docker ...` process; the engine itself keeps
///   all state, so the client is freely shareable across tasks.
/// - Child processes are killed when their future is dropped, so a timed out
///   `wait` does not leave a dangling CLI process behind.
/// - "No such container" answers are mapped to success for `stop`/`rm` and to
///   `None` for `inspect`.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    /// Creates a client for `binary` (e.g. `docker` or `podman`).
    ///
    /// Returns an error if the engine does not answer a version query.
    pub async fn connect(binary: &str) -> Result<Self, RuntimeError> {
        info!("Initializing container runtime client using {}", binary);
        let client = DockerCli {
            binary: binary.to_string(),
        };
        let version = client
            .exec(&["version", "--format", "{{.Server.Version}}"])
            .await
            .map_err(|e| {
                error!("Container engine is not reachable: {}", e);
                RuntimeError::Unavailable(e.to_string())
            })?;
        info!("Container engine available (server {})", version.trim());
        Ok(client)
    }

    /// Runs one CLI command and returns its stdout.
    async fn exec<S: AsRef<str>>(&self, args: &[S]) -> Result<String, RuntimeError> {
        let rendered = self.render(args);
        debug!("Running `{}`", rendered);

        let output = Command::new(&self.binary)
            .args(args.iter().map(|a| a.as_ref()))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RuntimeError::Unavailable(format!("{} not found in PATH", self.binary))
                } else {
                    RuntimeError::IoError(e)
                }
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(RuntimeError::CommandFailed {
                command: rendered,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    fn render<S: AsRef<str>>(&self, args: &[S]) -> String {
        let mut rendered = self.binary.clone();
        for arg in args {
            rendered.push(' ');
            rendered.push_str(arg.as_ref());
        }
        rendered
    }
}

/// Builds the `create` argument list for a spec.
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--workdir".to_string(),
        spec.working_dir.clone(),
        "--memory".to_string(),
        spec.limits.memory.clone(),
        "--memory-swap".to_string(),
        spec.limits.memory.clone(),
        "--cpus".to_string(),
        spec.limits.cpus.to_string(),
        "--security-opt".to_string(),
        "no-new-privileges".to_string(),
    ];

    match spec.network {
        NetworkPolicy::Disabled => {
            args.push("--network".to_string());
            args.push("none".to_string());
            args.push("--pids-limit".to_string());
            args.push(EXECUTION_PIDS_LIMIT.to_string());
        }
        NetworkPolicy::Bridge => {
            if let Some(binding) = spec.port {
                args.push("-p".to_string());
                args.push(format!("{}:{}", binding.host_port, binding.container_port));
            }
        }
    }

    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// Parses `"<status> <exit code>"` as printed by the inspect template.
pub fn parse_state(line: &str) -> Option<ContainerState> {
    let mut parts = line.split_whitespace();
    let state = RunState::parse(parts.next()?);
    let exit_code = parts.next().and_then(|c| c.parse::<i64>().ok());
    Some(ContainerState { state, exit_code })
}

/// True when the engine reported that the container does not exist.
pub fn is_missing(err: &RuntimeError) -> bool {
    match err {
        RuntimeError::NotFound(_) => true,
        RuntimeError::CommandFailed { stderr, .. } => {
            let stderr = stderr.to_lowercase();
            stderr.contains("no such container") || stderr.contains("no such object")
        }
        _ => false,
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.exec(&["image", "inspect", image]).await.is_ok() {
            debug!("Image {} already present", image);
            return Ok(());
        }
        info!("Pulling image {}", image);
        self.exec(&["pull", image]).await?;
        info!("Pulled image {}", image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let out = self.exec(create_args(spec).as_slice()).await?;
        let id = out.trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::CommandFailed {
                command: format!("{} create --name {}", self.binary, spec.name),
                status: None,
                stderr: "engine returned no container id".to_string(),
            });
        }
        Ok(id)
    }

    async fn copy_into(
        &self,
        id: &str,
        host_dir: &Path,
        container_dir: &str,
    ) -> Result<(), RuntimeError> {
        let source = format!("{}/.", host_dir.display());
        let target = format!("{}:{}", id, container_dir);
        self.exec(&["cp", source.as_str(), target.as_str()]).await?;
        Ok(())
    }

    async fn copy_out(
        &self,
        id: &str,
        container_dir: &str,
        host_dir: &Path,
    ) -> Result<(), RuntimeError> {
        let source = format!("{}:{}/.", id, container_dir);
        let target = host_dir.display().to_string();
        self.exec(&["cp", source.as_str(), target.as_str()]).await?;
        Ok(())
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.exec(&["start", id]).await?;
        debug!("Started container {}", id);
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let out = self.exec(&["wait", id]).await?;
        out.trim()
            .parse::<i64>()
            .map_err(|e| RuntimeError::CommandFailed {
                command: format!("{} wait {}", self.binary, id),
                status: None,
                stderr: format!("unexpected exit code '{}': {}", out.trim(), e),
            })
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let secs = grace.as_secs().to_string();
        match self.exec(&["stop", "-t", secs.as_str(), id]).await {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => {
                debug!("Stop of {} skipped: container already gone", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        match self.exec(&["rm", "-f", id]).await {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => {
                debug!("Removal of {} skipped: container already gone", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerState>, RuntimeError> {
        match self
            .exec(&[
                "inspect",
                "--type",
                "container",
                "--format",
                "{{.State.Status}} {{.State.ExitCode}}",
                id,
            ])
            .await
        {
            Ok(out) => Ok(parse_state(&out)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn logs(
        &self,
        id: &str,
        tail: Option<usize>,
        limit: usize,
    ) -> Result<LogOutput, RuntimeError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("logs");
        if let Some(lines) = tail {
            cmd.arg("--tail").arg(lines.to_string());
        }
        cmd.arg(id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut out_buffer = OutputBuffer::new(limit);
        let mut err_buffer = OutputBuffer::new(limit);
        // Both pipes are drained concurrently so neither can fill up and block the other.
        let (out_read, err_read) = tokio::join!(
            async {
                match stdout {
                    Some(pipe) => out_buffer.fill_from(pipe).await,
                    None => Ok(()),
                }
            },
            async {
                match stderr {
                    Some(pipe) => err_buffer.fill_from(pipe).await,
                    None => Ok(()),
                }
            }
        );
        out_read?;
        err_read?;

        let status = child.wait().await?;
        let stderr = err_buffer.into_string();
        if !status.success() {
            let err = RuntimeError::CommandFailed {
                command: format!("{} logs {}", self.binary, id),
                status: status.code(),
                stderr,
            };
            if is_missing(&err) {
                return Err(RuntimeError::NotFound(id.to_string()));
            }
            return Err(err);
        }

        Ok(LogOutput {
            stdout: out_buffer.into_string(),
            stderr,
        })
    }
}
