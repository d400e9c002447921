//! Jobs, their results, and the languages a job can target.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::errors::CodeboxError;

/// Languages a submission may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python, Language::Java];

    /// Sandbox image that knows how to run this language.
    pub fn image(&self) -> &'static str {
        match self {
            Language::Python => "python_runner",
            Language::Java => "java_runner",
        }
    }

    /// File name the runner image expects to find in the mounted workspace.
    pub fn entry_filename(&self) -> &'static str {
        match self {
            Language::Python => "test.py",
            Language::Java => "Main.java",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = CodeboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            other => Err(CodeboxError::ConfigError(format!(
                "Unsupported language '{}'",
                other
            ))),
        }
    }
}

/// A unit of submitted code. The ID is assigned by the producer and must be
/// unique among jobs that are still in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    id: String,
    language: Language,
    code: String,
}

impl Job {
    pub fn new(id: impl Into<String>, language: Language, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            language,
            code: code.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

/// Lifecycle step at which a sandbox operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStage {
    Create,
    Start,
    Wait,
    FetchOutput,
    Remove,
}

impl fmt::Display for SandboxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxStage::Create => "create",
            SandboxStage::Start => "start",
            SandboxStage::Wait => "wait",
            SandboxStage::FetchOutput => "fetch_output",
            SandboxStage::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Why a job produced no output.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    #[error("Workspace preparation failed: {message}")]
    Workspace { message: String },
    #[error("Sandbox {stage} failed: {message}")]
    Sandbox { stage: SandboxStage, message: String },
    #[error("Execution exceeded the {limit_ms}ms time limit")]
    Timeout { limit_ms: u64 },
    #[error("Job was cancelled during shutdown")]
    Cancelled,
}

impl JobError {
    pub fn sandbox(stage: SandboxStage, err: impl fmt::Display) -> Self {
        JobError::Sandbox {
            stage,
            message: err.to_string(),
        }
    }
}

/// Outcome of exactly one accepted [`Job`], correlated by ID.
///
/// Either `output` is populated and `error` is `None`, or `output` is empty and
/// `error` describes the failure. The constructors are the only way to build
/// one, so no other shape exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    id: String,
    output: String,
    error: Option<JobError>,
}

impl JobResult {
    pub fn success(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: JobError) -> Self {
        Self {
            id: id.into(),
            output: String::new(),
            error: Some(error),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
