//! Per-stage job queues.
//!
//! Delivery is at-least-once: a job can be handed out again after a worker
//! crash (see [`JobQueue::requeue_stale`]), so stage handlers must be
//! idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contentmill_core::{ItemId, JobId, Stage};
use contentmill_db::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Claimed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "claimed" => Ok(JobStatus::Claimed),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A queued job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub item_id: ItemId,
    pub stage: Stage,
    pub status: JobStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Queue counters for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a new job for `item_id` on `stage`.
    async fn enqueue(&self, stage: Stage, item_id: ItemId) -> DbResult<QueuedJob>;

    /// Claim the oldest pending job of `stage`.
    async fn claim(&self, stage: Stage, worker_id: &str) -> DbResult<Option<QueuedJob>>;

    async fn complete(&self, job_id: JobId) -> DbResult<()>;

    /// Record the failure in the queue's own bookkeeping. The item row is
    /// the source of truth for what happened to the item.
    async fn fail(&self, job_id: JobId, error: &str) -> DbResult<()>;

    /// Release a claimed job back to pending.
    async fn release(&self, job_id: JobId) -> DbResult<()>;

    /// Whether `item_id` has a pending or claimed job on `stage`.
    async fn has_open_job(&self, stage: Stage, item_id: ItemId) -> DbResult<bool>;

    /// Return jobs claimed before `claimed_before` to pending. Used on
    /// startup to recover from crashed workers.
    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> DbResult<u64>;

    async fn stats(&self, stage: Stage) -> DbResult<QueueStats>;
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: uuid::Uuid,
    item_id: uuid::Uuid,
    stage: String,
    status: String,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for QueuedJob {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        Ok(QueuedJob {
            id: JobId::from_uuid(row.id),
            item_id: ItemId::from_uuid(row.item_id),
            stage: row.stage.parse().map_err(DbError::Decode)?,
            status: row.status.parse().map_err(DbError::Decode)?,
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at,
            error: row.error,
            created_at: row.created_at,
        })
    }
}

/// Job queue backed by PostgreSQL.
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, stage: Stage, item_id: ItemId) -> DbResult<QueuedJob> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO job_queue (id, item_id, stage, status, created_at)
            VALUES ($1, $2, $3, 'pending', NOW())
            RETURNING id, item_id, stage, status, claimed_by, claimed_at, error, created_at
            "#,
        )
        .bind(JobId::new().as_uuid())
        .bind(item_id.as_uuid())
        .bind(stage.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    /// Uses SKIP LOCKED so concurrent workers never claim the same job.
    async fn claim(&self, stage: Stage, worker_id: &str) -> DbResult<Option<QueuedJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE job_queue
            SET status = 'claimed', claimed_by = $2, claimed_at = NOW()
            WHERE id = (
                SELECT id FROM job_queue
                WHERE stage = $1 AND status = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, item_id, stage, status, claimed_by, claimed_at, error, created_at
            "#,
        )
        .bind(stage.as_str())
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn complete(&self, job_id: JobId) -> DbResult<()> {
        sqlx::query("UPDATE job_queue SET status = 'completed' WHERE id = $1")
            .bind(job_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, job_id: JobId, error: &str) -> DbResult<()> {
        sqlx::query("UPDATE job_queue SET status = 'failed', error = $2 WHERE id = $1")
            .bind(job_id.as_uuid())
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release(&self, job_id: JobId) -> DbResult<()> {
        sqlx::query(
            "UPDATE job_queue SET status = 'pending', claimed_by = NULL, claimed_at = NULL WHERE id = $1 AND status = 'claimed'",
        )
        .bind(job_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_open_job(&self, stage: Stage, item_id: ItemId) -> DbResult<bool> {
        let open: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM job_queue
                WHERE item_id = $1 AND stage = $2 AND status IN ('pending', 'claimed')
            )
            "#,
        )
        .bind(item_id.as_uuid())
        .bind(stage.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(open)
    }

    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL
            WHERE status = 'claimed' AND claimed_at < $1
            "#,
        )
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self, stage: Stage) -> DbResult<QueueStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM job_queue WHERE stage = $1 GROUP BY status",
        )
        .bind(stage.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match status.parse().map_err(DbError::Decode)? {
                JobStatus::Pending => stats.queued = count,
                JobStatus::Claimed => stats.active = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}

/// In-process job queue for tests and single-node runs. Jobs do not survive
/// a restart.
#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<QueuedJob>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job ever enqueued, oldest first.
    pub async fn jobs(&self) -> Vec<QueuedJob> {
        self.jobs.lock().await.clone()
    }

    async fn update(&self, job_id: JobId, apply: impl FnOnce(&mut QueuedJob)) -> DbResult<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| DbError::NotFound(format!("job {}", job_id)))?;
        apply(job);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, stage: Stage, item_id: ItemId) -> DbResult<QueuedJob> {
        let job = QueuedJob {
            id: JobId::new(),
            item_id,
            stage,
            status: JobStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            error: None,
            created_at: Utc::now(),
        };
        self.jobs.lock().await.push(job.clone());
        Ok(job)
    }

    async fn claim(&self, stage: Stage, worker_id: &str) -> DbResult<Option<QueuedJob>> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs
            .iter_mut()
            .find(|j| j.stage == stage && j.status == JobStatus::Pending)
        else {
            return Ok(None);
        };

        job.status = JobStatus::Claimed;
        job.claimed_by = Some(worker_id.to_string());
        job.claimed_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: JobId) -> DbResult<()> {
        self.update(job_id, |job| job.status = JobStatus::Completed)
            .await
    }

    async fn fail(&self, job_id: JobId, error: &str) -> DbResult<()> {
        self.update(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
        })
        .await
    }

    async fn release(&self, job_id: JobId) -> DbResult<()> {
        self.update(job_id, |job| {
            if job.status == JobStatus::Claimed {
                job.status = JobStatus::Pending;
                job.claimed_by = None;
                job.claimed_at = None;
            }
        })
        .await
    }

    async fn has_open_job(&self, stage: Stage, item_id: ItemId) -> DbResult<bool> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .any(|j| j.stage == stage && j.item_id == item_id && j.status.is_open()))
    }

    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> DbResult<u64> {
        let mut requeued = 0;
        for job in self.jobs.lock().await.iter_mut() {
            if job.status == JobStatus::Claimed
                && job.claimed_at.is_some_and(|at| at < claimed_before)
            {
                job.status = JobStatus::Pending;
                job.claimed_by = None;
                job.claimed_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn stats(&self, stage: Stage) -> DbResult<QueueStats> {
        let mut counts: HashMap<JobStatus, u64> = HashMap::new();
        for job in self.jobs.lock().await.iter().filter(|j| j.stage == stage) {
            *counts.entry(job.status).or_default() += 1;
        }

        let count = |status| counts.get(&status).copied().unwrap_or(0);
        Ok(QueueStats {
            queued: count(JobStatus::Pending),
            active: count(JobStatus::Claimed),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_claims_are_per_stage_and_fifo() {
        let queue = MemoryJobQueue::new();
        let first = ItemId::new();
        let second = ItemId::new();
        queue.enqueue(Stage::Content, first).await.unwrap();
        queue.enqueue(Stage::Render, ItemId::new()).await.unwrap();
        queue.enqueue(Stage::Content, second).await.unwrap();

        let a = queue.claim(Stage::Content, "w1").await.unwrap().unwrap();
        let b = queue.claim(Stage::Content, "w2").await.unwrap().unwrap();
        assert_eq!(a.item_id, first);
        assert_eq!(b.item_id, second);
        assert!(queue.claim(Stage::Content, "w3").await.unwrap().is_none());

        let stats = queue.stats(Stage::Content).await.unwrap();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.queued, 0);
        assert_eq!(queue.stats(Stage::Render).await.unwrap().queued, 1);
    }

    #[tokio::test]
    async fn test_complete_fail_and_open_jobs() {
        let queue = MemoryJobQueue::new();
        let item = ItemId::new();
        let job = queue.enqueue(Stage::Publish, item).await.unwrap();
        assert!(queue.has_open_job(Stage::Publish, item).await.unwrap());

        queue.claim(Stage::Publish, "w").await.unwrap();
        queue.fail(job.id, "rejected").await.unwrap();
        assert!(!queue.has_open_job(Stage::Publish, item).await.unwrap());

        let stats = queue.stats(Stage::Publish).await.unwrap();
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_requeue_stale_claims() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(Stage::Render, ItemId::new()).await.unwrap();
        queue.claim(Stage::Render, "crashed").await.unwrap().unwrap();

        let requeued = queue
            .requeue_stale(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(requeued, 1);
        assert!(queue.claim(Stage::Render, "w").await.unwrap().is_some());
    }
}
