//! Sandbox execution environments.
//!
//! A [`SandboxExecutor`] exposes the lifecycle of one isolated environment as
//! discrete steps so the caller decides what happens between them. Each code
//! runner owns its own executor, obtained from a [`SandboxConnector`].

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::errors::SandboxError;

pub mod docker;

pub use docker::{DockerConnector, DockerSandboxExecutor};

/// Captured streams of a finished sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
}

impl SandboxOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Folds both streams into the single text reported to the caller.
    ///
    /// Labels only appear when both streams have content.
    pub fn compose(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("STDOUT:\n{}\nSTDERR:\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (true, true) => String::new(),
        }
    }
}

/// How waiting on a sandbox ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The sandbox stopped running with this exit status.
    Exited(i64),
    /// The runtime could not report an exit.
    Errored(String),
}

#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Provisions a stopped sandbox from `image` with `host_path` mounted
    /// inside it. Returns the sandbox ID.
    async fn create(&self, image: &str, host_path: &Path) -> Result<String, SandboxError>;

    async fn start(&self, sandbox_id: &str) -> Result<(), SandboxError>;

    /// Blocks until the sandbox is no longer running.
    async fn wait_until_exited(&self, sandbox_id: &str) -> WaitOutcome;

    async fn fetch_output(&self, sandbox_id: &str) -> Result<SandboxOutput, SandboxError>;

    /// Tears the sandbox down, stopping it first if it is still running.
    async fn remove(&self, sandbox_id: &str) -> Result<(), SandboxError>;
}

/// Opens runtime connections, one per worker.
pub trait SandboxConnector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn SandboxExecutor>, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_both_streams() {
        let output = SandboxOutput::new("out\n", "err\n");
        assert_eq!(output.compose(), "STDOUT:\nout\n\nSTDERR:\nerr\n");
    }

    #[test]
    fn test_compose_single_stream() {
        assert_eq!(SandboxOutput::new("hi\n", "").compose(), "hi\n");
        assert_eq!(
            SandboxOutput::new("", "Main.java:1: error").compose(),
            "Main.java:1: error"
        );
    }

    #[test]
    fn test_compose_empty() {
        assert_eq!(SandboxOutput::default().compose(), "");
    }
}
