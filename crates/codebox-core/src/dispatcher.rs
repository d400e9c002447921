//! Pull-based scheduling of queued jobs onto a fixed pool of code runners.
//!
//! Idle workers advertise themselves by pushing a one-shot intake handle into a
//! bounded idle pool. A single dispatch loop pairs the next queued job with the
//! next handle it finds there, so a job always goes to whichever worker became
//! free first and completion order is independent of submission order.
//!
//! Stopping is immediate for the dispatch loop: jobs still buffered in the queue,
//! and a job already pulled off the queue but not yet handed to a worker, are
//! dropped without a result. Jobs already inside a worker run to completion,
//! unless [`Dispatcher::shutdown`] runs out of drain time and cancels them.
//! A worker that still has not finished once the abort grace period is over
//! is torn down, and its job is abandoned without a result.

use futures_util::future::join_all;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::executors::SandboxConnector;
use crate::queue::{JobQueue, ResultSender};
use crate::runner::{CodeRunner, IntakeHandle, RunnerSettings};

/// How long aborted workers get to report their cancelled jobs before their
/// tasks are torn down.
pub const DEFAULT_ABORT_GRACE: Duration = Duration::from_secs(5);

struct WorkerHandle {
    id: usize,
    stop: CancellationToken,
    abort: CancellationToken,
    current: watch::Receiver<Option<String>>,
    task: JoinHandle<()>,
}

/// What happened to in-flight work during [`Dispatcher::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every worker finished its job within the drain timeout.
    pub drained: bool,
    /// Jobs interrupted after the drain timeout expired. Each of them was
    /// reported with a cancellation error.
    pub cancelled: Vec<String>,
    /// Jobs whose worker did not stop within the abort grace period. These
    /// never produce a result.
    pub abandoned: Vec<String>,
}

pub struct Dispatcher {
    max_workers: usize,
    settings: RunnerSettings,
    abort_grace: Duration,
    idle_tx: Option<mpsc::Sender<IntakeHandle>>,
    idle_rx: Option<mpsc::Receiver<IntakeHandle>>,
    shutdown: CancellationToken,
    workers: Vec<WorkerHandle>,
    dispatch_task: Option<JoinHandle<()>>,
    queue_closed: Option<CancellationToken>,
    cancellations_tx: mpsc::UnboundedSender<String>,
    cancellations_rx: mpsc::UnboundedReceiver<String>,
}

impl Dispatcher {
    pub fn new(max_workers: usize, settings: RunnerSettings) -> Self {
        let (idle_tx, idle_rx) = mpsc::channel(max_workers.max(1));
        let (cancellations_tx, cancellations_rx) = mpsc::unbounded_channel();
        Self {
            max_workers,
            settings,
            abort_grace: DEFAULT_ABORT_GRACE,
            idle_tx: Some(idle_tx),
            idle_rx: Some(idle_rx),
            shutdown: CancellationToken::new(),
            workers: Vec::with_capacity(max_workers),
            dispatch_task: None,
            queue_closed: None,
            cancellations_tx,
            cancellations_rx,
        }
    }

    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }

    /// Starts the workers and the dispatch loop. Returns how many workers are
    /// running; a worker whose sandbox connection fails is skipped.
    pub fn run(
        &mut self,
        connector: &dyn SandboxConnector,
        mut queue: JobQueue,
        results: ResultSender,
    ) -> usize {
        let (Some(idle_tx), Some(idle_rx)) = (self.idle_tx.take(), self.idle_rx.take()) else {
            log::error!("Dispatcher is already running");
            return self.workers.len();
        };

        for id in 0..self.max_workers {
            let executor = match connector.connect() {
                Ok(executor) => executor,
                Err(e) => {
                    log::error!("Failed to create worker {}: {}", id, e);
                    continue;
                }
            };

            let runner = CodeRunner::new(id, executor, self.settings.clone());
            let stop = CancellationToken::new();
            let abort = runner.abort_token();
            let current = runner.subscribe_current();
            let task = runner.start(
                idle_tx.clone(),
                results.clone(),
                stop.clone(),
                self.cancellations_tx.clone(),
            );

            self.workers.push(WorkerHandle {
                id,
                stop,
                abort,
                current,
                task,
            });
        }
        // Only workers may hold idle-pool senders, so the pool closes once they
        // have all exited.
        drop(idle_tx);

        if self.workers.is_empty() {
            log::error!("No workers could be started; closing the job queue");
            queue.close();
        } else {
            log::info!(
                "Dispatcher started with {} of {} workers",
                self.workers.len(),
                self.max_workers
            );
        }

        self.queue_closed = Some(queue.close_token());
        self.dispatch_task = Some(tokio::spawn(dispatch(
            queue,
            idle_rx,
            self.shutdown.clone(),
        )));
        self.workers.len()
    }

    /// Stops dispatching, tells every worker to stop after its current job and
    /// closes the job queue. Does not wait.
    pub fn stop(&self) {
        log::info!("Stopping dispatcher");
        self.shutdown.cancel();
        for worker in &self.workers {
            worker.stop.cancel();
        }
        if let Some(closed) = &self.queue_closed {
            closed.cancel();
        }
    }

    /// Stops, then waits up to `drain_timeout` for running jobs to finish.
    /// Jobs still running after that are cancelled, and workers that ignore
    /// the cancellation for longer than the abort grace period are torn down.
    ///
    /// The results consumer must keep draining while this runs.
    pub async fn shutdown(mut self, drain_timeout: Duration) -> ShutdownReport {
        self.stop();

        let mut workers = std::mem::take(&mut self.workers);
        let drained = tokio::time::timeout(
            drain_timeout,
            join_all(workers.iter_mut().map(|w| &mut w.task)),
        )
        .await
        .is_ok();

        let mut report = ShutdownReport {
            drained,
            ..ShutdownReport::default()
        };

        if !drained {
            for worker in &workers {
                let job_id = worker.current.borrow().clone();
                if let Some(job_id) = job_id {
                    log::warn!(
                        "Worker {} did not finish job '{}' in time; cancelling",
                        worker.id,
                        job_id
                    );
                }
                worker.abort.cancel();
            }

            // Handles that already completed must not be polled again.
            let settled = tokio::time::timeout(
                self.abort_grace,
                join_all(
                    workers
                        .iter_mut()
                        .filter(|w| !w.task.is_finished())
                        .map(|w| &mut w.task),
                ),
            )
            .await
            .is_ok();

            if !settled {
                for worker in workers.iter().filter(|w| !w.task.is_finished()) {
                    let job_id = worker.current.borrow().clone();
                    match job_id {
                        Some(job_id) => {
                            log::error!(
                                "Worker {} is stuck on job '{}'; abandoning it",
                                worker.id,
                                job_id
                            );
                            report.abandoned.push(job_id);
                        }
                        None => log::error!("Worker {} did not stop; tearing it down", worker.id),
                    }
                    worker.task.abort();
                }
                join_all(
                    workers
                        .iter_mut()
                        .filter(|w| !w.task.is_finished())
                        .map(|w| &mut w.task),
                )
                .await;
            }
        }

        while let Ok(job_id) = self.cancellations_rx.try_recv() {
            report.cancelled.push(job_id);
        }

        if let Some(task) = self.dispatch_task.take() {
            let _ = task.await;
        }

        log::info!(
            "Dispatcher shut down (drained: {}, cancelled: {}, abandoned: {})",
            report.drained,
            report.cancelled.len(),
            report.abandoned.len()
        );
        report
    }

    /// Number of workers that were started.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// IDs of the jobs workers are executing right now.
    pub fn in_flight(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter_map(|w| w.current.borrow().clone())
            .collect()
    }
}

async fn dispatch(
    mut queue: JobQueue,
    mut idle_pool: mpsc::Receiver<IntakeHandle>,
    shutdown: CancellationToken,
) {
    'jobs: loop {
        let mut job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break 'jobs,
            next = queue.recv() => match next {
                Some(job) => job,
                None => break 'jobs,
            },
        };

        loop {
            let handle = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::warn!("Dispatcher stopped; dropping job '{}' before hand-off", job.id());
                    break 'jobs;
                }
                next = idle_pool.recv() => match next {
                    Some(handle) => handle,
                    None => {
                        log::error!("No workers left; dropping job '{}'", job.id());
                        break 'jobs;
                    }
                },
            };

            match handle.intake.send(job) {
                Ok(()) => {
                    log::debug!("Handed job to worker {}", handle.worker_id);
                    break;
                }
                // That worker exited after advertising itself; try the next one.
                Err(returned) => job = returned,
            }
        }
    }

    if !queue.is_empty() {
        log::warn!(
            "Dispatcher stopped with {} queued jobs that will not run",
            queue.len()
        );
    }
    queue.close();
}
