//! Bounded mailboxes connecting producers and consumers to the dispatch engine.
//!
//! Both directions use bounded `mpsc` channels, so a full queue applies
//! backpressure to whoever is sending. The job queue can additionally be closed
//! from the consumer side, which rejects producers immediately, including
//! those already parked on a full queue.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::CodeboxError;
use crate::job::{Job, JobResult};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Creates the job queue. The submitter half is cloneable and handed to
/// producers; the queue half is handed to the dispatcher.
pub fn job_queue(capacity: usize) -> (JobSubmitter, JobQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    (
        JobSubmitter {
            tx,
            closed: closed.clone(),
        },
        JobQueue { rx, closed },
    )
}

/// Creates the channel workers report results on.
pub fn results_channel(capacity: usize) -> (ResultSender, ResultReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ResultSender { tx }, ResultReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct JobSubmitter {
    tx: mpsc::Sender<Job>,
    closed: CancellationToken,
}

impl JobSubmitter {
    /// Enqueues a job, waiting while the queue is full.
    pub async fn submit(&self, job: Job) -> Result<(), CodeboxError> {
        if self.closed.is_cancelled() {
            return Err(CodeboxError::QueueClosed {
                job_id: job.id().to_string(),
            });
        }

        let job_id = job.id().to_string();
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(CodeboxError::QueueClosed { job_id }),
            sent = self.tx.send(job) => sent.map_err(|_| CodeboxError::QueueClosed { job_id }),
        }
    }

    /// Enqueues a job without waiting.
    pub fn try_submit(&self, job: Job) -> Result<(), CodeboxError> {
        if self.closed.is_cancelled() {
            return Err(CodeboxError::QueueClosed {
                job_id: job.id().to_string(),
            });
        }

        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => CodeboxError::QueueFull {
                job_id: job.id().to_string(),
            },
            mpsc::error::TrySendError::Closed(job) => CodeboxError::QueueClosed {
                job_id: job.id().to_string(),
            },
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct JobQueue {
    rx: mpsc::Receiver<Job>,
    closed: CancellationToken,
}

impl JobQueue {
    /// Next queued job, or `None` once the queue is closed or every submitter
    /// is gone.
    pub async fn recv(&mut self) -> Option<Job> {
        if self.closed.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    /// Rejects all further submissions. Jobs already buffered stay buffered and
    /// are never handed out.
    pub fn close(&mut self) {
        self.closed.cancel();
        self.rx.close();
    }

    /// Token that closes this queue when cancelled.
    pub(crate) fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Number of jobs currently buffered.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: mpsc::Sender<JobResult>,
}

impl ResultSender {
    /// Delivers a result, waiting while the channel is full. Returns `false`
    /// if the consumer has gone away.
    pub async fn send(&self, result: JobResult) -> bool {
        match self.tx.send(result).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "Results channel closed; dropping result for job '{}'",
                    e.0.id()
                );
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct ResultReceiver {
    rx: mpsc::Receiver<JobResult>,
}

impl ResultReceiver {
    /// Next result, or `None` once every worker has exited.
    pub async fn recv(&mut self) -> Option<JobResult> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Language;
    use std::time::Duration;

    fn job(id: &str) -> Job {
        Job::new(id, Language::Python, "print('hi')")
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let (submitter, mut queue) = job_queue(4);
        submitter.submit(job("a")).await.unwrap();
        submitter.submit(job("b")).await.unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.recv().await.unwrap().id(), "a");
        assert_eq!(queue.recv().await.unwrap().id(), "b");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_try_submit_reports_full_queue() {
        let (submitter, _queue) = job_queue(1);
        submitter.try_submit(job("a")).unwrap();

        match submitter.try_submit(job("b")) {
            Err(CodeboxError::QueueFull { job_id }) => assert_eq!(job_id, "b"),
            other => panic!("expected QueueFull, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_rejects_new_and_blocked_producers() {
        let (submitter, mut queue) = job_queue(1);
        submitter.submit(job("a")).await.unwrap();

        let blocked = submitter.clone();
        let pending = tokio::spawn(async move { blocked.submit(job("b")).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        queue.close();

        let outcome = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(CodeboxError::QueueClosed { .. })));
        assert!(submitter.is_closed());
        assert!(matches!(
            submitter.submit(job("c")).await,
            Err(CodeboxError::QueueClosed { .. })
        ));
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_results_channel_ends_when_senders_drop() {
        let (sender, mut receiver) = results_channel(2);
        assert!(sender.send(JobResult::success("1", "ok")).await);
        drop(sender);

        assert_eq!(receiver.recv().await.unwrap().id(), "1");
        assert!(receiver.recv().await.is_none());
    }
}
