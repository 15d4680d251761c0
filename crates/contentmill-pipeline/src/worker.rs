//! Worker that processes jobs from one stage's queue.

use crate::queue::{JobQueue, QueuedJob};
use crate::stages::{StageHandler, StageOutcome};
use contentmill_core::sanitize_error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Backoff after the queue itself errors.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Sleep for `duration`. Returns true if shutdown was requested meanwhile
/// or the shutdown sender is gone.
pub(crate) async fn sleep_unless_shutdown(
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let sender_gone = tokio::select! {
        _ = sleep(duration) => return false,
        changed = shutdown.changed() => changed.is_err(),
    };
    sender_gone || *shutdown.borrow()
}

/// A worker that claims and handles jobs for a single stage.
pub struct Worker {
    id: String,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn StageHandler>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn StageHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            handler,
            poll_interval: Duration::from_secs(1),
            shutdown,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run the worker loop until shutdown is signalled. A job already being
    /// handled is finished first.
    pub async fn run(mut self) {
        let stage = self.handler.stage();
        info!(worker_id = %self.id, %stage, "Starting worker");

        while !*self.shutdown.borrow() {
            match self.queue.claim(stage, &self.id).await {
                Ok(Some(job)) => {
                    debug!(worker_id = %self.id, job_id = %job.id, item_id = %job.item_id, "Claimed job");
                    self.process(job).await;
                }
                Ok(None) => {
                    if self.idle(self.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to claim job");
                    if self.idle(QUEUE_ERROR_BACKOFF).await {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.id, %stage, "Worker stopped");
    }

    async fn idle(&mut self, duration: Duration) -> bool {
        sleep_unless_shutdown(duration, &mut self.shutdown).await
    }

    async fn process(&self, job: QueuedJob) {
        let handler = self.handler.clone();
        let item_id = job.item_id;

        // A panicking handler takes down its task, not the worker.
        let result = tokio::spawn(async move { handler.handle(item_id).await }).await;

        let bookkeeping = match result {
            Ok(Ok(StageOutcome::Failed { error, .. })) => self.queue.fail(job.id, &error).await,
            Ok(Ok(outcome)) => {
                debug!(job_id = %job.id, ?outcome, "Job done");
                self.queue.complete(job.id).await
            }
            Ok(Err(e)) => {
                error!(job_id = %job.id, %item_id, error = %e, "Stage handler error");
                self.queue.fail(job.id, &sanitize_error(&e.to_string())).await
            }
            Err(join_error) => {
                error!(job_id = %job.id, %item_id, error = %join_error, "Stage handler panicked");
                self.queue.fail(job.id, "stage handler panicked").await
            }
        };

        if let Err(e) = bookkeeping {
            warn!(job_id = %job.id, error = %e, "Failed to record job result");
        }
    }
}

/// Spawn `size` workers for `handler`'s stage.
pub fn spawn_pool(
    size: usize,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn StageHandler>,
    shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) -> Vec<JoinHandle<()>> {
    let stage = handler.stage();
    (0..size)
        .map(|i| {
            let worker = Worker::new(
                format!("{}-{}-{}", stage, std::process::id(), i),
                queue.clone(),
                handler.clone(),
                shutdown.clone(),
            )
            .with_poll_interval(poll_interval);
            tokio::spawn(worker.run())
        })
        .collect()
}
