//! Configuration loader for YAML files and environment overrides

use crate::config::types::*;
use crate::errors::CodeboxError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const ENV_WORKERS: &str = "CODEBOX_WORKERS";
pub const ENV_QUEUE_CAPACITY: &str = "CODEBOX_QUEUE_CAPACITY";
pub const ENV_EXECUTION_TIMEOUT_SECS: &str = "CODEBOX_EXECUTION_TIMEOUT_SECS";
pub const ENV_WORKSPACE_ROOT: &str = "CODEBOX_WORKSPACE_ROOT";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<CodeboxConfig, CodeboxError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            CodeboxError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::parse(&content)
    }

    /// Load configuration from a YAML file, falling back to defaults when the
    /// file does not exist. Any other failure to look the file up is an error.
    pub async fn from_file_or_default<P: AsRef<Path>>(
        path: P,
    ) -> Result<CodeboxConfig, CodeboxError> {
        let path = path.as_ref();
        match fs::try_exists(path).await {
            Ok(true) => return Self::from_file(path).await,
            Ok(false) => {}
            Err(e) => {
                return Err(CodeboxError::ConfigError(format!(
                    "Failed to access config file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        log::info!(
            "Config file {} not found, using defaults",
            path.display()
        );
        let mut config = CodeboxConfig::default();
        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string
    pub fn parse(content: &str) -> Result<CodeboxConfig, CodeboxError> {
        let mut config: CodeboxConfig = if content.trim().is_empty() {
            CodeboxConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                CodeboxError::ConfigError(format!("Failed to parse YAML config: {}", e))
            })?
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    /// Apply `CODEBOX_*` overrides from the process environment
    pub fn apply_env_overrides(config: &mut CodeboxConfig) -> Result<(), CodeboxError> {
        Self::apply_overrides_from(config, |key| env::var(key).ok())
    }

    /// Apply overrides using an arbitrary variable lookup
    pub fn apply_overrides_from<F>(config: &mut CodeboxConfig, lookup: F) -> Result<(), CodeboxError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_WORKERS) {
            config.dispatcher.workers = parse_number(ENV_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_QUEUE_CAPACITY) {
            config.dispatcher.queue_capacity = parse_number(ENV_QUEUE_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_EXECUTION_TIMEOUT_SECS) {
            config.sandbox.execution_timeout_secs =
                parse_number(ENV_EXECUTION_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_WORKSPACE_ROOT) {
            if !value.is_empty() {
                config.workspace.root = Some(PathBuf::from(value));
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CodeboxError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        CodeboxError::ConfigError(format!("Invalid value '{}' for {}: {}", value, key, e))
    })
}
