use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::languages::Language;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ceiling for every configured duration: one year.
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Application configuration structure that defines all runtime parameters.
///
/// Every section falls back to its defaults when absent, so an empty file is a
/// valid configuration. Values are checked by [`Config::validate`] after parsing.
///
/// # Examples
///
/// ```
/// use sandboxd::configuration::config::Config;
///
/// let config = Config::from_toml_str("[ports]\nstart = 9000\nend = 9010\n").unwrap();
/// assert_eq!(config.ports.start, 9000);
/// assert_eq!(config.execution.timeout_secs, 300);
/// ```
///
/// # Sections Overview
///
/// - `runtime`: container engine binary and stop grace period
/// - `registry`: where the registry document lives
/// - `execution`: one-shot run timeout, resource caps and output ceiling
/// - `preview`: TTL bounds, readiness polling and log retention
/// - `ports`: inclusive host port range handed out to previews
/// - `reaper`: sweep interval and staleness thresholds
/// - `languages`: base image and preview caps per runtime family
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub registry: RegistryConfig,
    pub execution: ExecutionConfig,
    pub preview: PreviewConfig,
    pub ports: PortsConfig,
    pub reaper: ReaperConfig,
    pub languages: LanguagesConfig,
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        debug!("Configuration parsed: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.start == 0 || self.ports.start > self.ports.end {
            return Err(ConfigError::BadPortsRange(format!(
                "invalid range {}-{}",
                self.ports.start, self.ports.end
            )));
        }

        let preview = &self.preview;
        if preview.min_ttl_mins == 0 || preview.min_ttl_mins > preview.max_ttl_mins {
            return Err(ConfigError::BadTtlBounds(format!(
                "min {} / max {} minutes",
                preview.min_ttl_mins, preview.max_ttl_mins
            )));
        }
        if preview.default_ttl_mins < preview.min_ttl_mins
            || preview.default_ttl_mins > preview.max_ttl_mins
        {
            return Err(ConfigError::BadTtlBounds(format!(
                "default {} minutes outside {}-{}",
                preview.default_ttl_mins, preview.min_ttl_mins, preview.max_ttl_mins
            )));
        }

        for (name, value) in [
            ("execution.timeout_secs", self.execution.timeout_secs),
            ("execution.install_timeout_secs", self.execution.install_timeout_secs),
            ("preview.readiness_timeout_secs", preview.readiness_timeout_secs),
            ("preview.readiness_interval_ms", preview.readiness_interval_ms),
            ("reaper.interval_secs", self.reaper.interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::NotInRange(format!("{} must be > 0", name)));
            }
        }

        for (name, secs) in [
            ("execution.timeout_secs", self.execution.timeout_secs),
            ("execution.install_timeout_secs", self.execution.install_timeout_secs),
            ("preview.max_ttl_mins", preview.max_ttl_mins.saturating_mul(60)),
            ("preview.readiness_timeout_secs", preview.readiness_timeout_secs),
            ("reaper.interval_secs", self.reaper.interval_secs),
            ("reaper.stale_after_secs", self.reaper.stale_after_secs),
            ("reaper.execution_grace_secs", self.reaper.execution_grace_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::NotInRange(format!(
                    "{} exceeds {} seconds",
                    name, MAX_DURATION_SECS
                )));
            }
        }

        if self.execution.output_limit_bytes == 0 {
            return Err(ConfigError::NotInRange(
                "execution.output_limit_bytes must be > 0".to_string(),
            ));
        }

        for (name, language) in [
            ("python", &self.languages.python),
            ("node", &self.languages.node),
        ] {
            if language.image.trim().is_empty() {
                return Err(ConfigError::UnknownLanguage(format!(
                    "languages.{} has no image",
                    name
                )));
            }
            if language.cpus <= 0.0 {
                return Err(ConfigError::NotInRange(format!(
                    "languages.{}.cpus must be > 0",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Returns the image/caps table entry for a language.
    pub fn language(&self, language: Language) -> &LanguageConfig {
        match language {
            Language::Python => &self.languages.python,
            Language::Node => &self.languages.node,
        }
    }
}
