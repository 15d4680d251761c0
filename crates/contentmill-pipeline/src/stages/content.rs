use async_trait::async_trait;
use chrono::{Duration, Utc};
use contentmill_core::collaborator::{Generator, PromptContext};
use contentmill_core::history::GenerationRecord;
use contentmill_core::{ContentItem, ItemId, ItemStatus, Result, Stage};
use contentmill_db::{HistoryRepo, ItemRepo};
use std::sync::Arc;
use tracing::{info, warn};

use super::{StageContext, StageHandler, StageOutcome, entry_check};
use crate::fitness::{Candidate, FitnessCheck, generate_until_fit};

/// Generates the item's text, then hands it to the render stage.
pub struct ContentStage {
    ctx: Arc<StageContext>,
}

impl ContentStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageHandler for ContentStage {
    fn stage(&self) -> Stage {
        Stage::Content
    }

    async fn handle(&self, item_id: ItemId) -> Result<StageOutcome> {
        let item = self.ctx.items.get(item_id).await?;
        if item.awaits_text() && item.updated_at < self.ctx.stale_cutoff()? {
            info!(%item_id, "resuming generation interrupted before its text was stored");
            return generate_payload(&self.ctx, item).await;
        }

        let mut item = match entry_check(Stage::Content, item) {
            Ok(item) => item,
            Err(skipped) => return Ok(skipped),
        };

        if let Err(skipped) = self.ctx.advance(&mut item, ItemStatus::Generating).await? {
            return Ok(skipped);
        }

        generate_payload(&self.ctx, item).await
    }
}

/// Run the fitness loop for an item already in `generating`, store the
/// accepted text and enqueue the render job.
pub(crate) async fn generate_payload(
    ctx: &StageContext,
    mut item: ContentItem,
) -> Result<StageOutcome> {
    let generation = &ctx.config.generation;
    let window_start = Utc::now() - Duration::days(i64::from(generation.history_days));
    let history = ctx.history.since(&item.channel, window_start).await?;

    let check = FitnessCheck {
        template: &ctx.config.template,
        history: &history,
        similarity_threshold: generation.similarity_threshold,
    };

    let produce = |attempt: u32, previous_rejection: Option<String>| {
        let prompt = PromptContext {
            channel: item.channel.clone(),
            format: item.format,
            topic: item.payload.topic.clone(),
            attempt,
            previous_rejection,
        };
        let history = &history;
        let item_id = item.id;
        async move {
            match ctx.generator.generate(&prompt, history).await {
                Ok(generated) => Candidate {
                    text: generated.text,
                    classification: generated.classification,
                    used_fallback: false,
                },
                Err(e) => {
                    warn!(
                        %item_id,
                        attempt,
                        generator = ctx.generator.name(),
                        error = %e,
                        "generator failed, using fallback text"
                    );
                    let fallbacks = &generation.fallbacks;
                    let text = fallbacks
                        .get((attempt as usize - 1) % fallbacks.len().max(1))
                        .cloned()
                        .unwrap_or_default();
                    Candidate {
                        text,
                        classification: None,
                        used_fallback: true,
                    }
                }
            }
        }
    };

    let result = generate_until_fit(generation.max_attempts, produce, |text| check.check(text)).await;
    let accepted = match result {
        Ok(accepted) => accepted,
        Err(e) => return ctx.fail_item(&mut item, Stage::Content, &e).await,
    };

    item.payload.text = Some(accepted.text.clone());
    item.payload.classification = accepted.classification.clone();
    item.payload.attempts = accepted.attempts;
    item.payload.used_fallback = accepted.used_fallback;
    item.updated_at = Utc::now();

    if !ctx.try_save(&item, ItemStatus::Generating).await? {
        return Ok(StageOutcome::Skipped {
            status: ItemStatus::Generating,
        });
    }

    ctx.history
        .append(&GenerationRecord::new(
            item.channel.clone(),
            accepted.text,
            accepted.classification,
        ))
        .await?;
    ctx.enqueue_next(Stage::Render, item.id).await?;

    info!(
        item_id = %item.id,
        attempts = accepted.attempts,
        fallback = accepted.used_fallback,
        "content generated"
    );
    Ok(StageOutcome::Advanced {
        status: ItemStatus::Generating,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::*;
    use contentmill_core::{ErrorKind, MediaFormat};

    fn pending() -> ContentItem {
        ContentItem::pending("default", MediaFormat::Image, Utc::now())
            .with_topic(Some("patience".to_string()))
    }

    #[tokio::test]
    async fn test_generates_and_enqueues_render() {
        let h = Harness::new(
            MockGenerator::always("Patience is a quiet kind of strength."),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let id = h.insert(pending()).await;

        let outcome = ContentStage::new(h.ctx.clone()).handle(id).await.unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Advanced {
                status: ItemStatus::Generating
            }
        );

        let item = h.item(id).await;
        assert_eq!(
            item.payload.text.as_deref(),
            Some("Patience is a quiet kind of strength.")
        );
        assert_eq!(item.payload.attempts, 1);
        assert_eq!(h.history.len().await, 1);

        let jobs = h.queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].stage, Stage::Render);

        let prompts = h.generator.prompts.lock().unwrap();
        assert_eq!(prompts[0].topic.as_deref(), Some("patience"));
    }

    #[tokio::test]
    async fn test_retries_until_fit() {
        let h = Harness::new(
            MockGenerator::new(vec![
                Some("short"),
                Some("A calm mind sees the path more clearly."),
            ]),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let id = h.insert(pending()).await;

        ContentStage::new(h.ctx.clone()).handle(id).await.unwrap();
        assert_eq!(h.generator.calls(), 2);
        assert_eq!(h.item(id).await.payload.attempts, 2);

        let prompts = h.generator.prompts.lock().unwrap();
        assert!(prompts[1].previous_rejection.is_some());
    }

    #[tokio::test]
    async fn test_exhaustion_fails_item_without_render_job() {
        let h = Harness::new(
            MockGenerator::always("tiny"),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let id = h.insert(pending()).await;

        let outcome = ContentStage::new(h.ctx.clone()).handle(id).await.unwrap();
        assert!(matches!(
            outcome,
            StageOutcome::Failed {
                kind: ErrorKind::GenerationExhausted,
                ..
            }
        ));
        assert_eq!(h.generator.calls(), 3);

        let item = h.item(id).await;
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.failed_stage, Some(Stage::Content));
        assert!(!item.error.unwrap_or_default().is_empty());
        assert!(h.queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_generator_error_falls_back() {
        let h = Harness::new(
            MockGenerator::new(vec![None]),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let id = h.insert(pending()).await;

        ContentStage::new(h.ctx.clone()).handle(id).await.unwrap();
        let item = h.item(id).await;
        assert!(item.payload.used_fallback);
        assert_eq!(
            item.payload.text.as_deref(),
            Some("Small steps every day add up.")
        );
    }

    #[tokio::test]
    async fn test_repeat_of_history_is_rejected() {
        let h = Harness::new(
            MockGenerator::new(vec![
                Some("Patience is a quiet kind of strength."),
                Some("Courage grows every time you use it."),
            ]),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        h.history
            .append(&GenerationRecord::new(
                "default",
                "Patience is a quiet kind of strength",
                None,
            ))
            .await
            .unwrap();
        let id = h.insert(pending()).await;

        ContentStage::new(h.ctx.clone()).handle(id).await.unwrap();
        assert_eq!(
            h.item(id).await.payload.text.as_deref(),
            Some("Courage grows every time you use it.")
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let h = Harness::new(
            MockGenerator::always("Patience is a quiet kind of strength."),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let id = h.insert(pending()).await;
        let stage = ContentStage::new(h.ctx.clone());

        stage.handle(id).await.unwrap();
        let second = stage.handle(id).await.unwrap();
        assert_eq!(
            second,
            StageOutcome::Skipped {
                status: ItemStatus::Generating
            }
        );
        assert_eq!(h.generator.calls(), 1);
        assert_eq!(h.queue.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_generation_resumes() {
        let h = Harness::new(
            MockGenerator::always("Patience is a quiet kind of strength."),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let mut item = pending();
        item.status = ItemStatus::Generating;
        item.updated_at = Utc::now() - Duration::hours(1);
        let id = h.insert(item).await;

        let outcome = ContentStage::new(h.ctx.clone()).handle(id).await.unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Advanced {
                status: ItemStatus::Generating
            }
        );
        assert_eq!(
            h.item(id).await.payload.text.as_deref(),
            Some("Patience is a quiet kind of strength.")
        );
        assert_eq!(h.queue.jobs().await[0].stage, Stage::Render);
    }

    #[tokio::test]
    async fn test_generation_in_progress_is_left_alone() {
        let h = Harness::new(
            MockGenerator::always("Patience is a quiet kind of strength."),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let mut item = pending();
        item.status = ItemStatus::Generating;
        let id = h.insert(item).await;

        let outcome = ContentStage::new(h.ctx.clone()).handle(id).await.unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Skipped {
                status: ItemStatus::Generating
            }
        );
        assert_eq!(h.generator.calls(), 0);
        assert!(h.queue.jobs().await.is_empty());
    }
}
