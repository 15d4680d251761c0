//! Stage handlers.
//!
//! Every handler loads the item, checks that it sits in the stage's entry
//! status and does nothing otherwise. Writes are conditional on the status
//! the handler read, so a duplicate delivery that loses the race observes a
//! conflict and backs off instead of overwriting the winner.

mod content;
mod on_demand;
mod publish;
mod render;

pub use content::ContentStage;
pub use on_demand::{OnDemandGenerator, OnDemandRequest, OnDemandResult};
pub use publish::{PublishStage, resolve_public_url};
pub use render::RenderStage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contentmill_config::SystemConfig;
use contentmill_core::collaborator::{Generator, Publisher, Renderer};
use contentmill_core::{ContentItem, Error, ErrorKind, ItemId, ItemStatus, Result, Stage};
use contentmill_db::{DbError, HistoryRepo, ItemRepo};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::queue::JobQueue;
use crate::render_lock::RenderLock;

/// Everything a handler needs, shared by all workers of a process.
pub struct StageContext {
    pub items: Arc<dyn ItemRepo>,
    pub history: Arc<dyn HistoryRepo>,
    pub queue: Arc<dyn JobQueue>,
    pub generator: Arc<dyn Generator>,
    pub renderer: Arc<dyn Renderer>,
    pub publisher: Arc<dyn Publisher>,
    pub render_lock: RenderLock,
    pub config: Arc<SystemConfig>,
}

/// What one handler invocation did to its item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The item moved forward and now has `status`.
    Advanced { status: ItemStatus },
    /// The item was not in the stage's entry status, or another delivery
    /// changed it first. Nothing was written.
    Skipped { status: ItemStatus },
    /// The item is now `failed` with the sanitized `error`.
    Failed { error: String, kind: ErrorKind },
}

impl StageOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed { .. })
    }
}

#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> Stage;

    /// Run the stage for one item.
    ///
    /// Business failures are persisted on the item and reported as
    /// [`StageOutcome::Failed`]; `Err` is reserved for storage problems
    /// that left the item untouched.
    async fn handle(&self, item_id: ItemId) -> Result<StageOutcome>;
}

/// Pass `item` through if it is in `stage`'s entry status.
pub(crate) fn entry_check(
    stage: Stage,
    item: ContentItem,
) -> std::result::Result<ContentItem, StageOutcome> {
    if item.status != stage.entry_status() {
        info!(
            item_id = %item.id,
            %stage,
            status = %item.status,
            "item not in entry status, skipping"
        );
        return Err(StageOutcome::Skipped {
            status: item.status,
        });
    }
    Ok(item)
}

impl StageContext {
    /// Load `item_id` if it is in `stage`'s entry status.
    pub(crate) async fn load_for(
        &self,
        stage: Stage,
        item_id: ItemId,
    ) -> Result<std::result::Result<ContentItem, StageOutcome>> {
        let item = self.items.get(item_id).await?;
        Ok(entry_check(stage, item))
    }

    /// Items untouched since this instant are presumed abandoned by a
    /// crashed worker: twice the render lock timeout ago.
    pub(crate) fn stale_cutoff(&self) -> Result<DateTime<Utc>> {
        let stale_after = chrono::Duration::from_std(self.config.render.lock_timeout * 2)
            .map_err(|e| Error::Internal(format!("stale cutoff: {e}")))?;
        Ok(Utc::now() - stale_after)
    }

    /// Persist `item` if storage still holds it in `expected`. Returns
    /// `false` when another delivery got there first.
    pub(crate) async fn try_save(&self, item: &ContentItem, expected: ItemStatus) -> Result<bool> {
        match self.items.update(item, expected).await {
            Ok(()) => Ok(true),
            Err(DbError::Conflict(reason)) => {
                info!(item_id = %item.id, %reason, "lost update race, skipping");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move to `next` and persist, or report a skip if the write lost.
    pub(crate) async fn advance(
        &self,
        item: &mut ContentItem,
        next: ItemStatus,
    ) -> Result<std::result::Result<(), StageOutcome>> {
        let expected = item.status;
        item.transition(next)?;
        if !self.try_save(item, expected).await? {
            return Ok(Err(StageOutcome::Skipped { status: expected }));
        }
        Ok(Ok(()))
    }

    /// Record `cause` on the item as a failure of `stage`.
    pub(crate) async fn fail_item(
        &self,
        item: &mut ContentItem,
        stage: Stage,
        cause: &Error,
    ) -> Result<StageOutcome> {
        let expected = item.status;
        item.fail(stage, &cause.to_string())?;
        if !self.try_save(item, expected).await? {
            return Ok(StageOutcome::Skipped { status: expected });
        }

        let message = item.error.clone().unwrap_or_default();
        error!(
            item_id = %item.id,
            %stage,
            kind = ?cause.kind(),
            error = %message,
            "stage failed"
        );
        Ok(StageOutcome::Failed {
            error: message,
            kind: cause.kind(),
        })
    }

    /// Hand the item to the next stage's queue.
    pub(crate) async fn enqueue_next(&self, stage: Stage, item_id: ItemId) -> Result<()> {
        self.queue.enqueue(stage, item_id).await?;
        Ok(())
    }
}
