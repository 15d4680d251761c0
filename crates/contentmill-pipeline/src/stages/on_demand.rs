use chrono::Utc;
use contentmill_core::{ContentItem, MediaFormat, Result};
use contentmill_db::ItemRepo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::content::generate_payload;
use super::{StageContext, StageOutcome};

/// A one-off generation outside the daily schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnDemandRequest {
    /// Defaults to the scheduled channel.
    #[serde(default)]
    pub channel: Option<String>,
    pub format: MediaFormat,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnDemandResult {
    pub item: ContentItem,
    pub outcome: StageOutcome,
}

/// Creates an item already in `generating` and runs generation inline. From
/// there the item follows the normal render and publish path; it is due
/// immediately.
pub struct OnDemandGenerator {
    ctx: Arc<StageContext>,
}

impl OnDemandGenerator {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }

    pub async fn generate(&self, request: OnDemandRequest) -> Result<OnDemandResult> {
        let channel = request
            .channel
            .unwrap_or_else(|| self.ctx.config.schedule.channel.clone());
        let item = ContentItem::self_seeded(channel, request.format, Utc::now())
            .with_topic(request.topic)
            .with_variant(request.variant);
        let item_id = item.id;

        self.ctx.items.insert(&item).await?;
        info!(%item_id, format = %item.format, "on-demand generation started");

        let outcome = generate_payload(&self.ctx, item).await?;
        let item = self.ctx.items.get(item_id).await?;
        Ok(OnDemandResult { item, outcome })
    }
}
