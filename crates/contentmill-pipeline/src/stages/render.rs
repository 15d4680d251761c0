use async_trait::async_trait;
use contentmill_core::collaborator::{RenderOutcome, RenderRequest, Renderer};
use contentmill_core::{Error, ItemId, ItemStatus, Result, Stage};
use std::sync::Arc;
use tracing::{debug, info};

use super::{StageContext, StageHandler, StageOutcome};

/// Renders the asset under the process-wide render lock.
pub struct RenderStage {
    ctx: Arc<StageContext>,
}

impl RenderStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageHandler for RenderStage {
    fn stage(&self) -> Stage {
        Stage::Render
    }

    async fn handle(&self, item_id: ItemId) -> Result<StageOutcome> {
        let ctx = &self.ctx;
        let mut item = match ctx.load_for(Stage::Render, item_id).await? {
            Ok(item) => item,
            Err(skipped) => return Ok(skipped),
        };

        // Charged to content so that a retry regenerates the text.
        if item.payload.text.is_none() {
            let cause = Error::Validation("item has no generated text to render".to_string());
            return ctx.fail_item(&mut item, Stage::Content, &cause).await;
        }

        let mut permit = match ctx.render_lock.acquire(ctx.config.render.lock_timeout).await {
            Ok(permit) => permit,
            Err(e) => return ctx.fail_item(&mut item, Stage::Render, &e).await,
        };

        let output_path = ctx
            .config
            .render
            .output_dir
            .join(format!("{}.{}", item.id, item.format.asset_extension()));
        let request = RenderRequest {
            payload: item.payload.clone(),
            format: item.format,
            template: item.variant.clone(),
            output_path,
        };

        debug!(%item_id, renderer = ctx.renderer.name(), "rendering");
        let rendered = ctx.renderer.render(request).await;
        permit.release();

        let path = match rendered {
            Ok(RenderOutcome::Rendered { path }) => path,
            Ok(RenderOutcome::Failed { error }) => {
                let cause = Error::collaborator(Stage::Render, error);
                return ctx.fail_item(&mut item, Stage::Render, &cause).await;
            }
            Err(e) => return ctx.fail_item(&mut item, Stage::Render, &e).await,
        };

        item.asset_ref = Some(path);
        let next = ItemStatus::after_render(item.format);
        if let Err(skipped) = ctx.advance(&mut item, next).await? {
            return Ok(skipped);
        }

        info!(%item_id, status = %next, "asset rendered");
        Ok(StageOutcome::Advanced { status: next })
    }
}
