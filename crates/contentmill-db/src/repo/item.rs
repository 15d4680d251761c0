//! Content item repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contentmill_core::{ContentItem, ItemId, ItemOrigin, ItemStatus, Payload};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{DbError, DbResult};

/// A content item row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRecord {
    pub id: uuid::Uuid,
    pub channel: String,
    pub format: String,
    pub status: String,
    pub origin: String,
    pub scheduled_at: DateTime<Utc>,
    pub variant: Option<String>,
    pub payload: serde_json::Value,
    pub asset_ref: Option<String>,
    pub platform_ref: Option<String>,
    pub error: Option<String>,
    pub failed_stage: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ItemRecord> for ContentItem {
    type Error = DbError;

    fn try_from(record: ItemRecord) -> DbResult<Self> {
        let decode = |field: &str, e: String| DbError::Decode(format!("item {}: {field}: {e}", record.id));

        Ok(ContentItem {
            id: ItemId::from_uuid(record.id),
            format: record.format.parse().map_err(|e| decode("format", e))?,
            status: record.status.parse().map_err(|e| decode("status", e))?,
            origin: record.origin.parse().map_err(|e| decode("origin", e))?,
            failed_stage: record
                .failed_stage
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(|e| decode("failed_stage", e))?,
            payload: serde_json::from_value::<Payload>(record.payload.clone())
                .map_err(|e| decode("payload", e.to_string()))?,
            channel: record.channel,
            scheduled_at: record.scheduled_at,
            variant: record.variant,
            asset_ref: record.asset_ref,
            platform_ref: record.platform_ref,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

#[async_trait]
pub trait ItemRepo: Send + Sync {
    async fn insert(&self, item: &ContentItem) -> DbResult<()>;

    async fn get(&self, id: ItemId) -> DbResult<ContentItem>;

    /// Write every mutable field of `item`, provided the stored row is still
    /// in `expected`. Returns [`DbError::Conflict`] otherwise.
    async fn update(&self, item: &ContentItem, expected: ItemStatus) -> DbResult<()>;

    /// Whether any scheduler-created item falls in `[start, end)`.
    /// On-demand items are ignored.
    async fn scheduled_exists_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Items in `status` whose scheduled time is at or before `now`.
    async fn list_due(&self, status: ItemStatus, now: DateTime<Utc>)
    -> DbResult<Vec<ContentItem>>;

    /// Most recently scheduled items first.
    async fn list(&self, status: Option<ItemStatus>, limit: i64) -> DbResult<Vec<ContentItem>>;

    async fn count_by_status(&self) -> DbResult<HashMap<ItemStatus, i64>>;

    /// Variants of the most recently scheduled items, oldest first.
    async fn recent_variants(&self, limit: i64) -> DbResult<Vec<String>>;
}

/// PostgreSQL implementation of ItemRepo.
pub struct PgItemRepo {
    pool: PgPool,
}

impl PgItemRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn payload_json(item: &ContentItem) -> DbResult<serde_json::Value> {
    serde_json::to_value(&item.payload).map_err(|e| DbError::Decode(e.to_string()))
}

#[async_trait]
impl ItemRepo for PgItemRepo {
    async fn insert(&self, item: &ContentItem) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO content_items
                (id, channel, format, status, origin, scheduled_at, variant, payload,
                 asset_ref, platform_ref, error, failed_stage, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(&item.channel)
        .bind(item.format.as_str())
        .bind(item.status.as_str())
        .bind(item.origin.as_str())
        .bind(item.scheduled_at)
        .bind(&item.variant)
        .bind(payload_json(item)?)
        .bind(&item.asset_ref)
        .bind(&item.platform_ref)
        .bind(&item.error)
        .bind(item.failed_stage.map(|s| s.as_str()))
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DbError::Duplicate(format!("item {}", item.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: ItemId) -> DbResult<ContentItem> {
        let record =
            sqlx::query_as::<_, ItemRecord>("SELECT * FROM content_items WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("item {}", id)))?;
        record.try_into()
    }

    async fn update(&self, item: &ContentItem, expected: ItemStatus) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE content_items
            SET status = $3, payload = $4, asset_ref = $5, platform_ref = $6,
                error = $7, failed_stage = $8, variant = $9, updated_at = $10
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(expected.as_str())
        .bind(item.status.as_str())
        .bind(payload_json(item)?)
        .bind(&item.asset_ref)
        .bind(&item.platform_ref)
        .bind(&item.error)
        .bind(item.failed_stage.map(|s| s.as_str()))
        .bind(&item.variant)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing row from a stale status.
            self.get(item.id).await?;
            return Err(DbError::Conflict(format!(
                "item {} is no longer {}",
                item.id, expected
            )));
        }
        Ok(())
    }

    async fn scheduled_exists_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM content_items
                WHERE origin = $1 AND scheduled_at >= $2 AND scheduled_at < $3
            )
            "#,
        )
        .bind(ItemOrigin::Scheduled.as_str())
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn list_due(
        &self,
        status: ItemStatus,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<ContentItem>> {
        let records = sqlx::query_as::<_, ItemRecord>(
            "SELECT * FROM content_items WHERE status = $1 AND scheduled_at <= $2 ORDER BY scheduled_at",
        )
        .bind(status.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(TryInto::try_into).collect()
    }

    async fn list(&self, status: Option<ItemStatus>, limit: i64) -> DbResult<Vec<ContentItem>> {
        let records = sqlx::query_as::<_, ItemRecord>(
            r#"
            SELECT * FROM content_items
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY scheduled_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_by_status(&self) -> DbResult<HashMap<ItemStatus, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM content_items GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(status, count)| {
                let status: ItemStatus = status.parse().map_err(DbError::Decode)?;
                Ok((status, count))
            })
            .collect()
    }

    async fn recent_variants(&self, limit: i64) -> DbResult<Vec<String>> {
        let mut variants: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT variant FROM content_items
            WHERE variant IS NOT NULL
            ORDER BY scheduled_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        variants.reverse();
        Ok(variants)
    }
}

/// In-process implementation of ItemRepo for tests and single-node runs.
#[derive(Default)]
pub struct MemoryItemRepo {
    items: RwLock<HashMap<ItemId, ContentItem>>,
}

impl MemoryItemRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Every item, ordered by scheduled time.
    pub async fn all(&self) -> Vec<ContentItem> {
        let mut items: Vec<_> = self.items.read().await.values().cloned().collect();
        items.sort_by_key(|item| (item.scheduled_at, item.id));
        items
    }
}

#[async_trait]
impl ItemRepo for MemoryItemRepo {
    async fn insert(&self, item: &ContentItem) -> DbResult<()> {
        let mut items = self.items.write().await;
        if items.contains_key(&item.id) {
            return Err(DbError::Duplicate(format!("item {}", item.id)));
        }
        items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get(&self, id: ItemId) -> DbResult<ContentItem> {
        self.items
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("item {}", id)))
    }

    async fn update(&self, item: &ContentItem, expected: ItemStatus) -> DbResult<()> {
        let mut items = self.items.write().await;
        let stored = items
            .get_mut(&item.id)
            .ok_or_else(|| DbError::NotFound(format!("item {}", item.id)))?;

        if stored.status != expected {
            return Err(DbError::Conflict(format!(
                "item {} is no longer {}",
                item.id, expected
            )));
        }
        *stored = item.clone();
        Ok(())
    }

    async fn scheduled_exists_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DbResult<bool> {
        Ok(self.items.read().await.values().any(|item| {
            item.origin == ItemOrigin::Scheduled
                && item.scheduled_at >= start
                && item.scheduled_at < end
        }))
    }

    async fn list_due(
        &self,
        status: ItemStatus,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<ContentItem>> {
        Ok(self
            .all()
            .await
            .into_iter()
            .filter(|item| item.status == status && item.is_due(now))
            .collect())
    }

    async fn list(&self, status: Option<ItemStatus>, limit: i64) -> DbResult<Vec<ContentItem>> {
        let mut items: Vec<_> = self
            .all()
            .await
            .into_iter()
            .filter(|item| status.is_none_or(|s| item.status == s))
            .collect();
        items.reverse();
        items.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(items)
    }

    async fn count_by_status(&self) -> DbResult<HashMap<ItemStatus, i64>> {
        let mut counts = HashMap::new();
        for item in self.items.read().await.values() {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn recent_variants(&self, limit: i64) -> DbResult<Vec<String>> {
        let variants: Vec<String> = self
            .all()
            .await
            .into_iter()
            .filter_map(|item| item.variant)
            .collect();
        let keep = usize::try_from(limit).unwrap_or(0);
        Ok(variants[variants.len().saturating_sub(keep)..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use contentmill_core::MediaFormat;

    #[tokio::test]
    async fn test_update_checks_expected_status() {
        let repo = MemoryItemRepo::new();
        let mut item = ContentItem::pending("quotes", MediaFormat::Image, Utc::now());
        repo.insert(&item).await.unwrap();

        item.transition(ItemStatus::Generating).unwrap();
        repo.update(&item, ItemStatus::Pending).await.unwrap();

        // A duplicate job still believing the item is pending loses.
        let stale = repo.update(&item, ItemStatus::Pending).await;
        assert!(matches!(stale, Err(DbError::Conflict(_))));
        assert_eq!(
            repo.get(item.id).await.unwrap().status,
            ItemStatus::Generating
        );
    }

    #[tokio::test]
    async fn test_scheduled_exists_between_is_half_open() {
        let repo = MemoryItemRepo::new();
        let at = Utc::now();
        repo.insert(&ContentItem::pending("quotes", MediaFormat::Image, at))
            .await
            .unwrap();

        assert!(
            repo.scheduled_exists_between(at, at + Duration::hours(1))
                .await
                .unwrap()
        );
        assert!(
            !repo
                .scheduled_exists_between(at - Duration::hours(1), at)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_on_demand_items_do_not_count_as_scheduled() {
        let repo = MemoryItemRepo::new();
        let at = Utc::now();
        repo.insert(&ContentItem::self_seeded("quotes", MediaFormat::Image, at))
            .await
            .unwrap();

        let (start, end) = (at - Duration::hours(1), at + Duration::hours(1));
        assert!(!repo.scheduled_exists_between(start, end).await.unwrap());

        repo.insert(&ContentItem::pending("quotes", MediaFormat::Image, at))
            .await
            .unwrap();
        assert!(repo.scheduled_exists_between(start, end).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_due_filters_status_and_time() {
        let repo = MemoryItemRepo::new();
        let now = Utc::now();

        let mut due = ContentItem::pending("quotes", MediaFormat::Image, now - Duration::minutes(5));
        due.status = ItemStatus::Generated;
        let mut later = ContentItem::pending("quotes", MediaFormat::Image, now + Duration::hours(2));
        later.status = ItemStatus::Generated;
        let pending = ContentItem::pending("quotes", MediaFormat::Image, now - Duration::hours(1));

        for item in [&due, &later, &pending] {
            repo.insert(item).await.unwrap();
        }

        let found = repo.list_due(ItemStatus::Generated, now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[tokio::test]
    async fn test_recent_variants_oldest_first() {
        let repo = MemoryItemRepo::new();
        let now = Utc::now();
        for (i, variant) in ["a", "b", "c"].into_iter().enumerate() {
            let item = ContentItem::pending("quotes", MediaFormat::Image, now + Duration::minutes(i as i64))
                .with_variant(Some(variant.to_string()));
            repo.insert(&item).await.unwrap();
        }

        assert_eq!(repo.recent_variants(2).await.unwrap(), vec!["b", "c"]);
    }
}
