//! Concurrent job-dispatch engine for running untrusted code in ephemeral sandboxes.
//!
//! Submissions flow through a small set of cooperating tasks:
//!
//! - **Queues**: bounded mailboxes carrying [`Job`]s in and [`JobResult`]s out
//! - **Dispatcher**: matches queued jobs to whichever worker is idle
//! - **Code runners**: each owns one sandbox executor and drives a job through
//!   workspace materialization, the sandbox lifecycle and output collection
//! - **Executors**: lifecycle façade over the container runtime (Docker)
//! - **Configuration**: YAML configuration with environment overrides

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod executors;
pub mod job;
pub mod queue;
pub mod runner;
pub mod workspace;

pub use config::*;
pub use dispatcher::{Dispatcher, ShutdownReport, DEFAULT_ABORT_GRACE};
pub use errors::{CodeboxError, SandboxError};
pub use executors::{SandboxConnector, SandboxExecutor, SandboxOutput, WaitOutcome};
pub use job::{Job, JobError, JobResult, Language, SandboxStage};
pub use queue::{job_queue, results_channel, JobQueue, JobSubmitter, ResultReceiver, ResultSender};
pub use runner::{CodeRunner, RunnerSettings};
