use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::container_management::types::ResourceLimits;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Container engine CLI used to drive containers.
    pub binary: String,
    /// Grace period given to a container before it is killed on stop.
    pub stop_grace_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            stop_grace_secs: 5,
        }
    }
}

impl RuntimeConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Location of the persisted registry document.
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".sandboxd/registry.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub timeout_secs: u64,
    pub memory: String,
    pub cpus: f64,
    /// Ceiling for each of stdout and stderr; output past it is truncated with a marker.
    pub output_limit_bytes: usize,
    pub install_dependencies: bool,
    pub install_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            memory: "512m".to_string(),
            cpus: 0.5,
            output_limit_bytes: 1024 * 1024,
            install_dependencies: true,
            install_timeout_secs: 60,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory: self.memory.clone(),
            cpus: self.cpus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub default_ttl_mins: u64,
    pub min_ttl_mins: u64,
    pub max_ttl_mins: u64,
    pub readiness_timeout_secs: u64,
    pub readiness_interval_ms: u64,
    /// Host name used when building preview URLs.
    pub host: String,
    pub log_tail_lines: usize,
    /// Number of torn-down previews whose last logs are kept in memory.
    pub log_snapshot_capacity: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            default_ttl_mins: 15,
            min_ttl_mins: 5,
            max_ttl_mins: 30,
            readiness_timeout_secs: 60,
            readiness_interval_ms: 2000,
            host: "localhost".to_string(),
            log_tail_lines: 100,
            log_snapshot_capacity: 64,
        }
    }
}

impl PreviewConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_mins * 60)
    }

    /// Clamps a requested TTL into the configured bounds.
    pub fn clamp_ttl(&self, requested: Duration) -> Duration {
        let min = Duration::from_secs(self.min_ttl_mins * 60);
        let max = Duration::from_secs(self.max_ttl_mins * 60);
        requested.clamp(min, max)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_mins * 60)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    /// First port of the inclusive range.
    pub start: u16,
    /// Last port of the inclusive range.
    pub end: u16,
    /// Skip ports that some other process on the host already holds.
    pub probe_host: bool,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            start: 8100,
            end: 8200,
            probe_host: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub interval_secs: u64,
    pub stale_after_secs: u64,
    pub execution_grace_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            stale_after_secs: 300,
            execution_grace_secs: 60,
        }
    }
}

/// Image and preview resource caps for one runtime family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub image: String,
    pub memory: String,
    pub cpus: f64,
}

impl LanguageConfig {
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory: self.memory.clone(),
            cpus: self.cpus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguagesConfig {
    pub python: LanguageConfig,
    pub node: LanguageConfig,
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        Self {
            python: LanguageConfig {
                image: "python:3.11-slim".to_string(),
                memory: "512m".to_string(),
                cpus: 0.5,
            },
            // Bundlers such as webpack need the larger ceiling.
            node: LanguageConfig {
                image: "node:18-slim".to_string(),
                memory: "1g".to_string(),
                cpus: 0.5,
            },
        }
    }
}
