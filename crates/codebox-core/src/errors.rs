//! Error types for the dispatch engine.
//!
//! Failures fall into two groups. Engine-level problems (bad configuration,
//! closed queues, unreachable runtimes) are returned to the caller as
//! [`CodeboxError`] or [`SandboxError`]. Per-job failures never escape a worker:
//! they are folded into the job's result as a [`crate::job::JobError`].

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CodeboxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Job queue is closed; job '{job_id}' was not accepted")]
    QueueClosed { job_id: String },
    #[error("Job queue is full; job '{job_id}' was not accepted")]
    QueueFull { job_id: String },
    #[error("Sandbox runtime error: {0}")]
    SandboxError(String),
}

impl From<std::io::Error> for CodeboxError {
    fn from(err: std::io::Error) -> Self {
        CodeboxError::IoError(err.to_string())
    }
}

impl From<SandboxError> for CodeboxError {
    fn from(err: SandboxError) -> Self {
        CodeboxError::SandboxError(err.to_string())
    }
}

// Errors raised by a sandbox executor
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Bollard (Docker client) error: {0}")]
    BollardError(#[from] bollard::errors::Error),
    #[error("Failed to connect to sandbox runtime: {0}")]
    ConnectionFailed(String),
    #[error("Sandbox '{0}' not found")]
    NotFound(String),
    #[error("Sandbox runtime error: {0}")]
    Runtime(String),
}
