//! Configuration types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::CodeboxError;
use crate::queue::DEFAULT_QUEUE_CAPACITY;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeboxConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub results_capacity: usize,
    /// How long shutdown waits for in-flight jobs before cancelling them.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl DispatcherConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            results_capacity: default_queue_capacity(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Where the workspace is mounted inside the sandbox.
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    /// Discard the container's writable layer when it exits.
    #[serde(default = "default_auto_remove")]
    pub auto_remove: bool,
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
}

impl SandboxConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mount_path: default_mount_path(),
            auto_remove: default_auto_remove(),
            execution_timeout_secs: default_execution_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Parent directory for workspaces; the platform temp dir when unset.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_workspace_prefix")]
    pub prefix: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            prefix: default_workspace_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, CodeboxError> {
        self.bind_addr.parse().map_err(|e| {
            CodeboxError::ConfigError(format!(
                "Invalid bind address '{}': {}",
                self.bind_addr, e
            ))
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl CodeboxConfig {
    pub fn validate(&self) -> Result<(), CodeboxError> {
        if self.dispatcher.workers == 0 {
            return Err(CodeboxError::ConfigError(
                "dispatcher.workers must be at least 1".to_string(),
            ));
        }
        if self.dispatcher.queue_capacity == 0 || self.dispatcher.results_capacity == 0 {
            return Err(CodeboxError::ConfigError(
                "dispatcher queue capacities must be at least 1".to_string(),
            ));
        }
        if self.sandbox.execution_timeout_secs == 0 {
            return Err(CodeboxError::ConfigError(
                "sandbox.execution_timeout_secs must be at least 1".to_string(),
            ));
        }
        if !self.sandbox.mount_path.starts_with('/') {
            return Err(CodeboxError::ConfigError(format!(
                "sandbox.mount_path must be absolute, got '{}'",
                self.sandbox.mount_path
            )));
        }
        if self.workspace.prefix.is_empty() || self.workspace.prefix.contains('/') {
            return Err(CodeboxError::ConfigError(format!(
                "workspace.prefix must be a plain, non-empty name, got '{}'",
                self.workspace.prefix
            )));
        }
        self.server.socket_addr()?;
        Ok(())
    }
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_mount_path() -> String {
    "/app".to_string()
}

fn default_auto_remove() -> bool {
    true
}

fn default_execution_timeout_secs() -> u64 {
    10
}

fn default_workspace_prefix() -> String {
    "temp".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}
