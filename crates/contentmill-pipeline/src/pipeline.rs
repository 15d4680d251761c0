//! The assembled pipeline: worker pools, sweep, daily scheduler and the
//! operator actions exposed by the API.

use chrono::{DateTime, NaiveDate, Utc};
use contentmill_core::{ContentItem, Error, ItemId, ItemStatus, Result, Stage};
use contentmill_db::ItemRepo;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::queue::{QueueStats, QueuedJob};
use crate::scheduler::{DailyScheduler, ScheduleOutcome};
use crate::stages::{
    ContentStage, OnDemandGenerator, OnDemandRequest, OnDemandResult, PublishStage, RenderStage,
    StageContext, StageHandler, StageOutcome,
};
use crate::sweep::ReadinessSweep;
use crate::worker::spawn_pool;

/// Queue counters of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub stage: Stage,
    pub workers: usize,
    #[serde(flatten)]
    pub queue: QueueStats,
}

/// Snapshot for operators.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub stages: Vec<StageStatus>,
    /// Renders currently holding the render lock.
    pub renders_in_flight: usize,
    /// Item counts keyed by status, every status present.
    pub items: BTreeMap<&'static str, i64>,
    pub generated_at: DateTime<Utc>,
}

pub struct ContentPipeline {
    ctx: Arc<StageContext>,
    scheduler: Arc<DailyScheduler>,
    sweep: Arc<ReadinessSweep>,
    on_demand: OnDemandGenerator,
    handlers: Vec<Arc<dyn StageHandler>>,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl ContentPipeline {
    pub fn new(ctx: StageContext) -> Self {
        let ctx = Arc::new(ctx);
        let scheduler = Arc::new(DailyScheduler::new(
            ctx.items.clone(),
            ctx.queue.clone(),
            ctx.config.clone(),
        ));
        let sweep = Arc::new(ReadinessSweep::new(
            ctx.items.clone(),
            ctx.queue.clone(),
            ctx.config.schedule.sweep_interval,
        ));
        let handlers: Vec<Arc<dyn StageHandler>> = vec![
            Arc::new(ContentStage::new(ctx.clone())),
            Arc::new(RenderStage::new(ctx.clone())),
            Arc::new(PublishStage::new(ctx.clone())),
        ];
        let (shutdown, _) = watch::channel(false);

        Self {
            on_demand: OnDemandGenerator::new(ctx.clone()),
            ctx,
            scheduler,
            sweep,
            handlers,
            poll_interval: Duration::from_secs(1),
            shutdown,
        }
    }

    /// How often idle workers poll their queue.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    fn handler(&self, stage: Stage) -> Result<&Arc<dyn StageHandler>> {
        self.handlers
            .iter()
            .find(|h| h.stage() == stage)
            .ok_or_else(|| Error::Internal(format!("no handler for stage {stage}")))
    }

    /// Clean up after a crash. Run once before [`start`](Self::start).
    ///
    /// Items stuck in `publishing` since before the stale cutoff are failed
    /// at the publish stage: whether the post went out is unknown, so an
    /// operator decides whether to retry. Jobs whose claim is older than
    /// the cutoff return to their queues. Returns the number of requeued
    /// jobs.
    pub async fn recover(&self) -> Result<u64> {
        let cutoff = self.ctx.stale_cutoff()?;

        let publishing = self
            .ctx
            .items
            .list(Some(ItemStatus::Publishing), i64::MAX)
            .await?;
        for mut item in publishing {
            if item.updated_at >= cutoff {
                continue;
            }
            let cause = Error::Internal(
                "publish interrupted, outcome unknown; check the platform before retrying"
                    .to_string(),
            );
            self.ctx.fail_item(&mut item, Stage::Publish, &cause).await?;
        }

        let requeued = self.ctx.queue.requeue_stale(cutoff).await?;
        if requeued > 0 {
            info!(requeued, "requeued jobs abandoned by crashed workers");
        }
        Ok(requeued)
    }

    /// Spawn the worker pools, the readiness sweep and the daily scheduler.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for handler in &self.handlers {
            let size = self.ctx.config.workers.for_stage(handler.stage());
            handles.extend(spawn_pool(
                size,
                self.ctx.queue.clone(),
                handler.clone(),
                self.shutdown.subscribe(),
                self.poll_interval,
            ));
        }

        handles.push(tokio::spawn(
            self.sweep.clone().run(self.shutdown.subscribe()),
        ));
        handles.push(tokio::spawn(
            self.scheduler.clone().run(self.shutdown.subscribe()),
        ));

        info!(tasks = handles.len(), "pipeline started");
        handles
    }

    /// Ask every background task to stop after its current unit of work.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run the scheduler for `date`, or for today in the configured timezone.
    pub async fn run_scheduler(&self, date: Option<NaiveDate>) -> Result<ScheduleOutcome> {
        let date = date.unwrap_or_else(|| self.scheduler.today());
        self.scheduler.schedule_day(date).await
    }

    /// Queue `stage` for one item. The handler still checks the item's
    /// status, so triggering a stage the item is not ready for is a no-op.
    pub async fn trigger_stage(&self, stage: Stage, item_id: ItemId) -> Result<QueuedJob> {
        self.ctx.items.get(item_id).await?;
        let job = self.ctx.queue.enqueue(stage, item_id).await?;
        info!(%item_id, %stage, job_id = %job.id, "stage triggered manually");
        Ok(job)
    }

    /// Run `stage` for one item right now, bypassing the queue.
    pub async fn run_stage(&self, stage: Stage, item_id: ItemId) -> Result<StageOutcome> {
        self.handler(stage)?.handle(item_id).await
    }

    pub async fn generate_on_demand(&self, request: OnDemandRequest) -> Result<OnDemandResult> {
        self.on_demand.generate(request).await
    }

    /// Put a failed item back at the stage it failed in and queue that stage.
    pub async fn retry(&self, item_id: ItemId) -> Result<QueuedJob> {
        let mut item = self.ctx.items.get(item_id).await?;
        let stage = item.reset_for_retry()?;
        self.ctx.items.update(&item, ItemStatus::Failed).await?;
        let job = self.ctx.queue.enqueue(stage, item_id).await?;
        info!(%item_id, %stage, "failed item re-queued by operator");
        Ok(job)
    }

    /// Record that an operator published an `awaiting_manual_publish` item
    /// by hand.
    pub async fn confirm_manual_publish(
        &self,
        item_id: ItemId,
        external_ref: Option<String>,
    ) -> Result<ContentItem> {
        let mut item = self.ctx.items.get(item_id).await?;
        if item.status != ItemStatus::AwaitingManualPublish {
            return Err(Error::InvalidTransition {
                from: item.status,
                to: ItemStatus::Published,
            });
        }

        item.transition(ItemStatus::Publishing)?;
        self.ctx
            .items
            .update(&item, ItemStatus::AwaitingManualPublish)
            .await?;

        item.platform_ref = external_ref;
        item.transition(ItemStatus::Published)?;
        self.ctx.items.update(&item, ItemStatus::Publishing).await?;

        info!(%item_id, "manual publish confirmed");
        Ok(item)
    }

    pub async fn status(&self) -> Result<PipelineStatus> {
        let mut stages = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            stages.push(StageStatus {
                stage,
                workers: self.ctx.config.workers.for_stage(stage),
                queue: self.ctx.queue.stats(stage).await?,
            });
        }

        let counts = self.ctx.items.count_by_status().await?;
        let items = ItemStatus::ALL
            .into_iter()
            .map(|status| (status.as_str(), counts.get(&status).copied().unwrap_or(0)))
            .collect();

        Ok(PipelineStatus {
            stages,
            renders_in_flight: self.ctx.render_lock.in_flight(),
            items,
            generated_at: Utc::now(),
        })
    }

    pub async fn item(&self, item_id: ItemId) -> Result<ContentItem> {
        Ok(self.ctx.items.get(item_id).await?)
    }

    /// Newest first.
    pub async fn items(&self, status: Option<ItemStatus>, limit: i64) -> Result<Vec<ContentItem>> {
        Ok(self.ctx.items.list(status, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::*;
    use contentmill_core::{ErrorKind, MediaFormat};

    fn pipeline(h: &Harness) -> ContentPipeline {
        let ctx = StageContext {
            items: h.ctx.items.clone(),
            history: h.ctx.history.clone(),
            queue: h.ctx.queue.clone(),
            generator: h.ctx.generator.clone(),
            renderer: h.ctx.renderer.clone(),
            publisher: h.ctx.publisher.clone(),
            render_lock: h.ctx.render_lock.clone(),
            config: h.ctx.config.clone(),
        };
        ContentPipeline::new(ctx).with_poll_interval(Duration::from_millis(10))
    }

    fn yesterday() -> NaiveDate {
        Utc::now().date_naive().pred_opt().unwrap()
    }

    /// Poll until every item in `ids` satisfies `done`.
    async fn wait_for(
        h: &Harness,
        ids: &[ItemId],
        done: impl Fn(&ContentItem) -> bool,
    ) -> Vec<ContentItem> {
        for _ in 0..500 {
            let items: Vec<_> = h
                .items
                .all()
                .await
                .into_iter()
                .filter(|i| ids.contains(&i.id))
                .collect();
            if items.len() == ids.len() && items.iter().all(&done) {
                return items;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("pipeline did not settle: {:?}", h.items.all().await);
    }

    const E2E_CONFIG: &str = r#"
        schedule {
            count 2
            window start="09:00" end="21:00"
            formats "image" "video"
            sweep-interval-secs 1
        }
        generation { max-attempts 3; fallback "Small steps every day add up." }
        render {
            lock-timeout-secs 5
            output-dir "/tmp/contentmill-test"
            public-base-url "https://media.example.com/daily/"
        }
        publish {
            account-id "acct-1"
            access-token-env "PATH"
        }
    "#;

    #[tokio::test]
    async fn test_end_to_end_image_publishes_and_video_waits() {
        let h = Harness::with_config(
            E2E_CONFIG,
            MockGenerator::always("Patience is a quiet kind of strength."),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let pipeline = pipeline(&h);

        // Yesterday's slots are all due, so the sweep publishes without waiting.
        let ids: Vec<ItemId> = match pipeline.run_scheduler(Some(yesterday())).await.unwrap() {
            ScheduleOutcome::Created { items, .. } => items.iter().map(|i| i.id).collect(),
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(ids.len(), 2);
        let handles = pipeline.start();

        let items = wait_for(&h, &ids, |i| {
            matches!(
                i.status,
                ItemStatus::Published | ItemStatus::AwaitingManualPublish
            )
        })
        .await;

        let image = items.iter().find(|i| i.format == MediaFormat::Image).unwrap();
        let video = items.iter().find(|i| i.format == MediaFormat::Video).unwrap();
        assert_eq!(image.status, ItemStatus::Published);
        assert_eq!(video.status, ItemStatus::AwaitingManualPublish);
        assert!(image.platform_ref.is_some());
        assert!(video.platform_ref.is_none());

        let confirmed = pipeline
            .confirm_manual_publish(video.id, Some("reel-42".to_string()))
            .await
            .unwrap();
        assert_eq!(confirmed.status, ItemStatus::Published);
        assert_eq!(confirmed.platform_ref.as_deref(), Some("reel-42"));

        let status = pipeline.status().await.unwrap();
        assert!(status.items["published"] >= 2);
        assert_eq!(status.stages.len(), 3);

        pipeline.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_publish_rejection_is_terminal_until_retry() {
        let h = Harness::new(
            MockGenerator::always("unused"),
            MockRenderer::ok(),
            MockPublisher::rejecting("token expired"),
        );
        let pipeline = pipeline(&h);
        let mut item = ContentItem::pending("default", MediaFormat::Image, Utc::now());
        item.status = ItemStatus::Generated;
        item.asset_ref = Some("/tmp/contentmill-test/a.png".to_string());
        let id = h.insert(item).await;

        let outcome = pipeline.run_stage(Stage::Publish, id).await.unwrap();
        assert!(outcome.is_failed());
        assert!(h.queue.jobs().await.is_empty());
        assert!(pipeline.sweep.sweep_once(Utc::now()).await.unwrap() == 0);

        let job = pipeline.retry(id).await.unwrap();
        assert_eq!(job.stage, Stage::Publish);
        let item = h.item(id).await;
        assert_eq!(item.status, ItemStatus::Generated);
        assert!(item.error.is_none());
    }

    #[tokio::test]
    async fn test_confirm_requires_awaiting_manual_publish() {
        let h = Harness::new(
            MockGenerator::always("unused"),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let pipeline = pipeline(&h);
        let mut item = ContentItem::pending("default", MediaFormat::Image, Utc::now());
        item.status = ItemStatus::Generated;
        let id = h.insert(item).await;

        let err = pipeline.confirm_manual_publish(id, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(h.item(id).await.status, ItemStatus::Generated);
    }

    #[tokio::test]
    async fn test_trigger_unknown_item_is_not_found() {
        let h = Harness::new(
            MockGenerator::always("unused"),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let pipeline = pipeline(&h);
        let err = pipeline
            .trigger_stage(Stage::Content, ItemId::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(h.queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_stage_follows_automatic_path() {
        let h = Harness::new(
            MockGenerator::always("Patience is a quiet kind of strength."),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let pipeline = pipeline(&h);
        let id = h
            .insert(ContentItem::pending("default", MediaFormat::Image, Utc::now()))
            .await;

        let outcome = pipeline.run_stage(Stage::Content, id).await.unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Advanced {
                status: ItemStatus::Generating
            }
        );
        assert_eq!(h.queue.jobs().await[0].stage, Stage::Render);
    }

    #[tokio::test]
    async fn test_on_demand_item_does_not_block_scheduling() {
        let h = Harness::new(
            MockGenerator::always("Patience is a quiet kind of strength."),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let pipeline = pipeline(&h);

        pipeline
            .generate_on_demand(OnDemandRequest {
                channel: None,
                format: MediaFormat::Image,
                topic: None,
                variant: None,
            })
            .await
            .unwrap();

        let outcome = pipeline.run_scheduler(None).await.unwrap();
        let count = h.ctx.config.schedule.count;
        assert_eq!(outcome.created(), count);
        assert_eq!(h.items.len().await, count + 1);

        let again = pipeline.run_scheduler(None).await.unwrap();
        assert!(matches!(again, ScheduleOutcome::AlreadyScheduled { .. }));
    }

    #[tokio::test]
    async fn test_text_lost_before_render_is_regenerated_on_retry() {
        let h = Harness::new(
            MockGenerator::always("Patience is a quiet kind of strength."),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let pipeline = pipeline(&h);
        let id = h
            .insert(ContentItem::self_seeded("default", MediaFormat::Image, Utc::now()))
            .await;

        let outcome = pipeline.run_stage(Stage::Render, id).await.unwrap();
        assert!(outcome.is_failed());

        let job = pipeline.retry(id).await.unwrap();
        assert_eq!(job.stage, Stage::Content);
        assert_eq!(h.item(id).await.status, ItemStatus::Pending);

        pipeline.run_stage(Stage::Content, id).await.unwrap();
        let outcome = pipeline.run_stage(Stage::Render, id).await.unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Advanced {
                status: ItemStatus::Generated
            }
        );
    }

    #[tokio::test]
    async fn test_recover_fails_stale_publishing_items() {
        let h = Harness::new(
            MockGenerator::always("unused"),
            MockRenderer::ok(),
            MockPublisher::ok(),
        );
        let pipeline = pipeline(&h);

        let mut stale = ContentItem::pending("default", MediaFormat::Image, Utc::now());
        stale.status = ItemStatus::Publishing;
        stale.asset_ref = Some("/tmp/contentmill-test/a.png".to_string());
        stale.updated_at = Utc::now() - chrono::Duration::hours(1);
        let stale = h.insert(stale).await;

        let mut fresh = ContentItem::pending("default", MediaFormat::Image, Utc::now());
        fresh.status = ItemStatus::Publishing;
        let fresh = h.insert(fresh).await;

        pipeline.recover().await.unwrap();

        let item = h.item(stale).await;
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.failed_stage, Some(Stage::Publish));
        assert!(item.error.unwrap().contains("outcome unknown"));
        assert_eq!(h.item(fresh).await.status, ItemStatus::Publishing);

        let job = pipeline.retry(stale).await.unwrap();
        assert_eq!(job.stage, Stage::Publish);
        assert_eq!(h.item(stale).await.status, ItemStatus::Generated);
    }
}
