//! Generation history repository. Append-only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contentmill_core::history::GenerationRecord;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::DbResult;

#[derive(Debug, Clone, sqlx::FromRow)]
struct HistoryRow {
    channel: String,
    text: String,
    classification: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<HistoryRow> for GenerationRecord {
    fn from(row: HistoryRow) -> Self {
        GenerationRecord {
            channel: row.channel,
            text: row.text,
            classification: row.classification,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
pub trait HistoryRepo: Send + Sync {
    async fn append(&self, record: &GenerationRecord) -> DbResult<()>;

    /// Records for `channel` created at or after `since`, oldest first.
    async fn since(&self, channel: &str, since: DateTime<Utc>) -> DbResult<Vec<GenerationRecord>>;
}

/// PostgreSQL implementation of HistoryRepo.
pub struct PgHistoryRepo {
    pool: PgPool,
}

impl PgHistoryRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryRepo for PgHistoryRepo {
    async fn append(&self, record: &GenerationRecord) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO generation_history (channel, text, classification, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&record.channel)
        .bind(&record.text)
        .bind(&record.classification)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn since(&self, channel: &str, since: DateTime<Utc>) -> DbResult<Vec<GenerationRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT channel, text, classification, created_at
            FROM generation_history
            WHERE channel = $1 AND created_at >= $2
            ORDER BY created_at
            "#,
        )
        .bind(channel)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(Default)]
pub struct MemoryHistoryRepo {
    records: RwLock<Vec<GenerationRecord>>,
}

impl MemoryHistoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryRepo for MemoryHistoryRepo {
    async fn append(&self, record: &GenerationRecord) -> DbResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn since(&self, channel: &str, since: DateTime<Utc>) -> DbResult<Vec<GenerationRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.channel == channel && r.created_at >= since)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_since_applies_window_and_channel() {
        let repo = MemoryHistoryRepo::new();
        let mut old = GenerationRecord::new("quotes", "old words", None);
        old.created_at = Utc::now() - Duration::days(90);
        repo.append(&old).await.unwrap();
        repo.append(&GenerationRecord::new("quotes", "fresh words", None))
            .await
            .unwrap();
        repo.append(&GenerationRecord::new("facts", "other channel", None))
            .await
            .unwrap();

        let recent = repo
            .since("quotes", Utc::now() - Duration::days(60))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].text, "fresh words");
    }
}
