//! Periodic readiness sweep.
//!
//! Publishing is driven by the clock, not by render completion: an item
//! that finishes rendering early waits here until its slot arrives, and one
//! that finishes late is picked up on the next pass.

use chrono::{DateTime, Utc};
use contentmill_core::{ItemStatus, Result, Stage};
use contentmill_db::ItemRepo;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::queue::JobQueue;
use crate::worker::sleep_unless_shutdown;

pub struct ReadinessSweep {
    items: Arc<dyn ItemRepo>,
    queue: Arc<dyn JobQueue>,
    interval: Duration,
}

impl ReadinessSweep {
    pub fn new(items: Arc<dyn ItemRepo>, queue: Arc<dyn JobQueue>, interval: Duration) -> Self {
        Self {
            items,
            queue,
            interval,
        }
    }

    /// Enqueue a publish job for every `generated` item due by `now` that
    /// has no publish job pending or running. Returns how many were queued.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.items.list_due(ItemStatus::Generated, now).await?;
        let mut enqueued = 0;

        for item in due {
            if self.queue.has_open_job(Stage::Publish, item.id).await? {
                debug!(item_id = %item.id, "publish already queued");
                continue;
            }
            self.queue.enqueue(Stage::Publish, item.id).await?;
            enqueued += 1;
        }

        if enqueued > 0 {
            info!(enqueued, "readiness sweep queued items for publish");
        }
        Ok(enqueued)
    }

    /// Sweep every interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting readiness sweep");
        loop {
            if let Err(e) = self.sweep_once(Utc::now()).await {
                warn!(error = %e, "readiness sweep failed");
            }
            if sleep_unless_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }
        info!("Readiness sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryJobQueue;
    use chrono::Duration as ChronoDuration;
    use contentmill_core::{ContentItem, MediaFormat};
    use contentmill_db::MemoryItemRepo;

    async fn item_at(items: &MemoryItemRepo, at: DateTime<Utc>, status: ItemStatus) -> ContentItem {
        let mut item = ContentItem::pending("default", MediaFormat::Image, at);
        item.status = status;
        items.insert(&item).await.unwrap();
        item
    }

    fn sweep() -> (ReadinessSweep, Arc<MemoryItemRepo>, Arc<MemoryJobQueue>) {
        let items = Arc::new(MemoryItemRepo::new());
        let queue = Arc::new(MemoryJobQueue::new());
        (
            ReadinessSweep::new(items.clone(), queue.clone(), Duration::from_secs(60)),
            items,
            queue,
        )
    }

    #[tokio::test]
    async fn test_only_due_generated_items_are_queued() {
        let (sweep, items, queue) = sweep();
        let now = Utc::now();
        let due = item_at(&items, now - ChronoDuration::minutes(5), ItemStatus::Generated).await;
        item_at(&items, now + ChronoDuration::hours(2), ItemStatus::Generated).await;
        item_at(&items, now - ChronoDuration::hours(1), ItemStatus::AwaitingManualPublish).await;
        item_at(&items, now - ChronoDuration::hours(1), ItemStatus::Generating).await;

        assert_eq!(sweep.sweep_once(now).await.unwrap(), 1);
        let jobs = queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].item_id, due.id);
        assert_eq!(jobs[0].stage, Stage::Publish);
    }

    #[tokio::test]
    async fn test_repeated_sweeps_do_not_duplicate_jobs() {
        let (sweep, items, queue) = sweep();
        let now = Utc::now();
        item_at(&items, now - ChronoDuration::minutes(1), ItemStatus::Generated).await;

        assert_eq!(sweep.sweep_once(now).await.unwrap(), 1);
        assert_eq!(sweep.sweep_once(now).await.unwrap(), 0);
        assert_eq!(queue.jobs().await.len(), 1);
    }
}
