use async_trait::async_trait;
use contentmill_core::collaborator::{PublishOutcome, Publisher};
use contentmill_core::{Error, ItemId, ItemStatus, Result, Stage};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use url::Url;

use super::{StageContext, StageHandler, StageOutcome};

/// Public URL for a stored asset reference.
///
/// `http(s)` references pass through. Local paths are served from
/// `public_base` by file name; without a base they cannot be published.
pub fn resolve_public_url(asset_ref: Option<&str>, public_base: Option<&Url>) -> Result<Url> {
    let asset_ref =
        asset_ref.ok_or_else(|| Error::Validation("item has no rendered asset".to_string()))?;

    if let Ok(url) = Url::parse(asset_ref) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(url);
        }
    }

    let base = public_base
        .ok_or_else(|| Error::Validation("asset is not publicly reachable".to_string()))?;
    let file_name = Path::new(asset_ref)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::Validation("asset reference has no file name".to_string()))?;

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(file_name)
        .map_err(|e| Error::Validation(format!("cannot build public asset URL: {e}")))
}

/// Publishes `generated` items through the publish collaborator. Items
/// awaiting manual publish are never touched here.
pub struct PublishStage {
    ctx: Arc<StageContext>,
}

impl PublishStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageHandler for PublishStage {
    fn stage(&self) -> Stage {
        Stage::Publish
    }

    async fn handle(&self, item_id: ItemId) -> Result<StageOutcome> {
        let ctx = &self.ctx;
        let mut item = match ctx.load_for(Stage::Publish, item_id).await? {
            Ok(item) => item,
            Err(skipped) => return Ok(skipped),
        };

        let credentials = match ctx.config.publish.credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                let cause = Error::Validation(e.to_string());
                return ctx.fail_item(&mut item, Stage::Publish, &cause).await;
            }
        };

        let asset_url = match resolve_public_url(
            item.asset_ref.as_deref(),
            ctx.config.render.public_base_url.as_ref(),
        ) {
            Ok(url) => url,
            Err(e) => return ctx.fail_item(&mut item, Stage::Publish, &e).await,
        };

        if let Err(skipped) = ctx.advance(&mut item, ItemStatus::Publishing).await? {
            return Ok(skipped);
        }

        let published = ctx
            .publisher
            .publish(&credentials, asset_url.as_str(), &item.caption())
            .await;

        let external_id = match published {
            Ok(PublishOutcome::Published { external_id }) => external_id,
            Ok(PublishOutcome::Rejected { error }) => {
                let cause = Error::collaborator(Stage::Publish, error);
                return ctx.fail_item(&mut item, Stage::Publish, &cause).await;
            }
            Err(e) => return ctx.fail_item(&mut item, Stage::Publish, &e).await,
        };

        item.platform_ref = Some(external_id);
        if let Err(skipped) = ctx.advance(&mut item, ItemStatus::Published).await? {
            return Ok(skipped);
        }

        info!(%item_id, platform_ref = ?item.platform_ref, "published");
        Ok(StageOutcome::Advanced {
            status: ItemStatus::Published,
        })
    }
}
