//! Core types used by the container management subsystem.

use serde::{Deserialize, Serialize};

/// Network attachment of a container. Fixed per record kind: execution
/// containers get none, preview containers are bridged and publish one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPolicy {
    Disabled,
    Bridge,
}

/// Host port published to a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

/// Memory and CPU caps applied at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Engine memory string such as `512m` or `1g`.
    pub memory: String,
    /// Fractional CPU share.
    pub cpus: f64,
}

/// Everything the runtime needs to create a container.
///
/// Has no volume field: project files reach a container only through
/// [`ContainerRuntime::copy_into`](super::runtime::ContainerRuntime::copy_into).
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub env: Vec<(String, String)>,
    pub limits: ResourceLimits,
    pub network: NetworkPolicy,
    pub port: Option<PortBinding>,
    pub labels: Vec<(String, String)>,
}

impl ContainerSpec {
    /// Spec running `script` through `sh -c` in `/app`.
    pub fn shell(name: &str, image: &str, script: &str, limits: ResourceLimits) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            working_dir: "/app".to_string(),
            env: Vec::new(),
            limits,
            network: NetworkPolicy::Disabled,
            port: None,
            labels: Vec::new(),
        }
    }

    pub fn script(&self) -> &str {
        self.command.last().map(String::as_str).unwrap_or_default()
    }
}

/// Coarse container state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Running,
    Exited,
    Other,
}

impl RunState {
    pub fn parse(status: &str) -> RunState {
        match status.trim() {
            "created" => RunState::Created,
            "running" | "restarting" => RunState::Running,
            "exited" | "dead" => RunState::Exited,
            _ => RunState::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub state: RunState,
    pub exit_code: Option<i64>,
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// True once the container can no longer serve anything.
    pub fn has_exited(&self) -> bool {
        self.state == RunState::Exited
    }
}

/// Captured container output, each stream already bounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOutput {
    pub stdout: String,
    pub stderr: String,
}

impl LogOutput {
    /// Both streams in one text, stderr after stdout.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let mut text = self.stdout.clone();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&self.stderr);
                text
            }
        }
    }
}
