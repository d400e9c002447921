//! Workers that turn a [`Job`] into a sandbox run and a [`JobResult`].
//!
//! A [`CodeRunner`] owns exactly one sandbox executor. Once started it loops:
//! it advertises a one-shot intake handle to the dispatcher's idle pool, waits
//! for either a job or its stop signal, runs the job to completion and reports
//! the result. Stopping never interrupts a job that is already running. Only
//! the separate abort signal, raised when a shutdown drain times out, does. An
//! abort interrupts whichever sandbox step is pending, and a sandbox that was
//! already created is still force-removed.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{CodeboxConfig, WorkspaceConfig};
use crate::executors::{SandboxExecutor, SandboxOutput, WaitOutcome};
use crate::job::{Job, JobError, JobResult, SandboxStage};
use crate::queue::ResultSender;
use crate::workspace::Workspace;

/// Per-job execution parameters shared by every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub execution_timeout: Duration,
    pub workspace: WorkspaceConfig,
}

impl RunnerSettings {
    pub fn from_config(config: &CodeboxConfig) -> Self {
        Self {
            execution_timeout: config.sandbox.execution_timeout(),
            workspace: config.workspace.clone(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&CodeboxConfig::default())
    }
}

/// An idle worker's offer to take exactly one job.
#[derive(Debug)]
pub(crate) struct IntakeHandle {
    pub(crate) worker_id: usize,
    pub(crate) intake: oneshot::Sender<Job>,
}

pub struct CodeRunner {
    id: usize,
    executor: Arc<dyn SandboxExecutor>,
    settings: RunnerSettings,
    abort: CancellationToken,
    current: watch::Sender<Option<String>>,
}

impl CodeRunner {
    pub fn new(id: usize, executor: Arc<dyn SandboxExecutor>, settings: RunnerSettings) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            id,
            executor,
            settings,
            abort: CancellationToken::new(),
            current,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Cancelling this token fails the running job with [`JobError::Cancelled`].
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Follows the ID of the job currently being executed.
    pub fn subscribe_current(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }

    /// Spawns the worker loop.
    pub(crate) fn start(
        self,
        idle_pool: mpsc::Sender<IntakeHandle>,
        results: ResultSender,
        stop: CancellationToken,
        cancellations: mpsc::UnboundedSender<String>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::debug!("Worker {} started", self.id);
            loop {
                let (intake, mut work) = oneshot::channel();
                let handle = IntakeHandle {
                    worker_id: self.id,
                    intake,
                };

                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    published = idle_pool.send(handle) => {
                        if published.is_err() {
                            break;
                        }
                    }
                }

                let job = tokio::select! {
                    received = &mut work => match received {
                        Ok(job) => job,
                        // The dispatcher is gone.
                        Err(_) => break,
                    },
                    // A job handed over just before the stop still runs.
                    _ = stop.cancelled() => match work.try_recv() {
                        Ok(job) => job,
                        Err(_) => break,
                    },
                };

                let result = self.execute(job).await;
                if result.error() == Some(&JobError::Cancelled) {
                    let _ = cancellations.send(result.id().to_string());
                }
                results.send(result).await;
            }
            log::debug!("Worker {} stopped", self.id);
        })
    }

    /// Runs one job through the full sandbox lifecycle.
    ///
    /// Always produces a result; the job's workspace is gone by the time this
    /// returns.
    pub async fn execute(&self, job: Job) -> JobResult {
        self.current.send_replace(Some(job.id().to_string()));
        log::info!(
            "Worker {} running job '{}' ({})",
            self.id,
            job.id(),
            job.language()
        );

        let result = self.run_code(&job).await;

        match result.error() {
            None => log::info!("Worker {} finished job '{}'", self.id, job.id()),
            Some(error) => log::warn!("Worker {} failed job '{}': {}", self.id, job.id(), error),
        }
        self.current.send_replace(None);
        result
    }

    async fn run_code(&self, job: &Job) -> JobResult {
        if self.abort.is_cancelled() {
            return JobResult::failure(job.id(), JobError::Cancelled);
        }

        let workspace =
            match Workspace::materialize(&self.settings.workspace, job.language(), job.code()).await
            {
                Ok(workspace) => workspace,
                Err(e) => {
                    return JobResult::failure(
                        job.id(),
                        JobError::Workspace {
                            message: e.to_string(),
                        },
                    )
                }
            };

        let outcome = self.run_in_sandbox(job, workspace.path()).await;

        let workspace_path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            log::warn!(
                "Worker {}: failed to remove workspace {}: {}",
                self.id,
                workspace_path.display(),
                e
            );
        }

        match outcome {
            Ok(output) => JobResult::success(job.id(), output),
            Err(error) => JobResult::failure(job.id(), error),
        }
    }

    async fn run_in_sandbox(&self, job: &Job, host_path: &Path) -> Result<String, JobError> {
        let sandbox_id = self
            .abortable(self.executor.create(job.language().image(), host_path))
            .await?
            .map_err(|e| JobError::sandbox(SandboxStage::Create, e))?;

        let output = match self
            .abortable(self.run_to_completion(&sandbox_id))
            .await
            .and_then(|completed| completed)
        {
            Ok(output) => output,
            Err(error) => {
                self.discard(&sandbox_id).await;
                return Err(error);
            }
        };

        match self.abortable(self.executor.remove(&sandbox_id)).await {
            Ok(removed) => removed.map_err(|e| JobError::sandbox(SandboxStage::Remove, e))?,
            Err(cancelled) => {
                self.discard(&sandbox_id).await;
                return Err(cancelled);
            }
        }

        Ok(output.compose())
    }

    /// Drives one sandbox step unless the abort signal fires first.
    async fn abortable<T>(&self, step: impl Future<Output = T>) -> Result<T, JobError> {
        tokio::select! {
            biased;
            _ = self.abort.cancelled() => Err(JobError::Cancelled),
            done = step => Ok(done),
        }
    }

    async fn run_to_completion(&self, sandbox_id: &str) -> Result<SandboxOutput, JobError> {
        self.executor
            .start(sandbox_id)
            .await
            .map_err(|e| JobError::sandbox(SandboxStage::Start, e))?;

        let limit = self.settings.execution_timeout;
        let outcome = tokio::time::timeout(limit, self.executor.wait_until_exited(sandbox_id))
            .await
            .map_err(|_| JobError::Timeout {
                limit_ms: limit.as_millis() as u64,
            })?;

        match outcome {
            WaitOutcome::Exited(code) => {
                log::debug!("Sandbox {} exited with status {}", sandbox_id, code)
            }
            WaitOutcome::Errored(cause) => {
                return Err(JobError::Sandbox {
                    stage: SandboxStage::Wait,
                    message: cause,
                })
            }
        }

        self.executor
            .fetch_output(sandbox_id)
            .await
            .map_err(|e| JobError::sandbox(SandboxStage::FetchOutput, e))
    }

    /// Best-effort teardown after a failed run. The job already has its error.
    async fn discard(&self, sandbox_id: &str) {
        if let Err(e) = self.executor.remove(sandbox_id).await {
            log::warn!(
                "Worker {}: sandbox {} could not be removed and may be leaked: {}",
                self.id,
                sandbox_id,
                e
            );
        }
    }
}
